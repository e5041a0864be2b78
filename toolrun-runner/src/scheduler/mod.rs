//! Scheduler layer for the runner
//!
//! This layer owns job admission, ordering and the worker pool. Jobs flow
//! from `submit` through the priority queue to workers, which run one
//! attempt at a time and write every state change through to the job store.

pub mod job_queue;
pub mod queue;

pub use job_queue::{JobQueue, ProgressCallback};
pub use queue::PriorityQueue;
