//! Data Transfer Objects
//!
//! Read-only projections of domain entities returned by status and
//! statistics queries.

pub mod job;
pub mod stats;
