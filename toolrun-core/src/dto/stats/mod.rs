//! Statistics DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::job::JobStatus;

/// Scheduler-wide counters and the current shape of the queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting in the priority lanes
    pub queue_size: usize,
    pub concurrency_limit: usize,
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub current_running: u64,
    /// Indexed jobs per status
    pub status_counts: HashMap<JobStatus, usize>,
    pub active_workers: usize,
}

/// Per-script execution totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptStats {
    pub total_executions: u64,
    pub total_failures: u64,
    /// Rolling average over all recorded executions
    pub avg_execution_time_ms: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl ScriptStats {
    pub fn record(&mut self, success: bool, execution_time_ms: u64) {
        self.total_executions += 1;
        if !success {
            self.total_failures += 1;
        }
        let n = self.total_executions as f64;
        self.avg_execution_time_ms =
            (self.avg_execution_time_ms * (n - 1.0) + execution_time_ms as f64) / n;
        self.last_execution = Some(Utc::now());
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.total_failures as f64 / self.total_executions as f64
    }
}
