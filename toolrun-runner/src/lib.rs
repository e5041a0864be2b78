//! Toolrun Runner
//!
//! Executes registered scripts as sandboxed, resource-limited subprocesses
//! and schedules them as durable jobs.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Registry: Read-only lookup of script descriptors
//! - Sandbox: Environment filtering and kernel resource limits
//! - Engine: Argument validation, subprocess supervision, classification
//! - Services: Single-attempt execution
//! - Retry: Backoff policy, retry decisions and execution statistics
//! - Repository: Durable job records
//! - Scheduler: Priority queue, worker pool and job lifecycle

pub mod config;
pub mod engine;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod sandbox;
pub mod scheduler;
pub mod service;
