//! Repository layer
//!
//! Durable storage for job records. The scheduler writes through to the
//! store after every state transition and reads it back at startup.
//!
//! The store is trait-based to enable testing with alternate backends.

mod jobs;

// Re-export traits
pub use jobs::JobStore;

// Re-export implementations
pub use jobs::FileJobStore;

pub use jobs::{Result, StoreError};
