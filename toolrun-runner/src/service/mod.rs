//! Service layer
//!
//! Services contain the runner's business logic. Execution of a single
//! attempt sits behind a trait so the retry coordinator and the scheduler
//! can be exercised against a stub.

mod execution;

// Re-export traits
pub use execution::ExecutionService;

// Re-export implementations
pub use execution::StandardExecutionService;
