//! Core domain types
//!
//! These types are shared between the scheduler (which mutates and persists
//! jobs), the execution engine (which produces results) and the CLI.

pub mod error;
pub mod execution;
pub mod job;
pub mod script;
