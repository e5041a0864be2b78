//! Execution engine building blocks
//!
//! Each step of a single attempt lives in its own module; the
//! [`StandardExecutionService`](crate::service::StandardExecutionService)
//! strings them together.

pub mod classify;
pub mod command;
pub mod outputs;
pub mod supervisor;
pub mod validation;

pub use classify::LaunchError;
pub use supervisor::{ProgressSink, Supervisor, Termination};
pub use validation::ArgumentError;
