//! Job status DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::ExecutionResult;
use crate::domain::job::{Job, JobFailure, JobPriority, JobProgress, JobStatus};

/// Snapshot of a job returned by status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub id: Uuid,
    pub script_id: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<ExecutionResult>,
    pub error: Option<JobFailure>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl From<&Job> for JobStatusReport {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            script_id: job.script_id.clone(),
            status: job.status,
            priority: job.priority,
            progress: job.progress.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            result: job.result.clone(),
            error: job.last_error.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_report_from_job() {
        let mut job = Job::new("echo", HashMap::new(), JobPriority::Low);
        job.start().unwrap();

        let report = JobStatusReport::from(&job);
        assert_eq!(report.id, job.id);
        assert_eq!(report.status, JobStatus::Running);
        assert_eq!(report.priority, JobPriority::Low);
        assert!(report.started_at.is_some());
        assert!(report.error.is_none());
    }
}
