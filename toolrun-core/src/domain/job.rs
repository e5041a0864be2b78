//! Job domain types
//!
//! A job is one request to run a registered script with concrete arguments.
//! All status changes go through the transition methods on [`Job`], which
//! enforce the lifecycle:
//!
//! ```text
//! Pending -> Running -> Completed | Failed | Retrying -> Pending
//! Pending -> Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::error::ErrorCategory;
use crate::domain::execution::ExecutionResult;

/// Version of the persisted job record layout
pub const JOB_SCHEMA_VERSION: u32 = 1;

/// Default number of automatic retries for a job
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job record
///
/// Structure shared between the scheduler (mutates) and the job store (persists).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: Uuid,
    pub script_id: String,
    #[serde(default)]
    pub arguments: HashMap<String, JsonValue>,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: JobProgress,
    pub result: Option<ExecutionResult>,
    pub last_error: Option<JobFailure>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub callback_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

fn default_schema_version() -> u32 {
    JOB_SCHEMA_VERSION
}

/// Job priority lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Lanes in the order workers drain them
    pub const ALL: [JobPriority; 3] = [JobPriority::High, JobPriority::Normal, JobPriority::Low];
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::High => write!(f, "high"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            "low" => Ok(JobPriority::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    /// Completed, Failed and Cancelled jobs never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retrying)
                | (Retrying, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the current attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    pub message: String,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            current: 0,
            total: 100,
            percentage: 0.0,
            message: String::new(),
        }
    }
}

impl JobProgress {
    pub fn update(&mut self, current: u64, total: Option<u64>, message: Option<String>) {
        self.current = current;
        if let Some(total) = total {
            self.total = total;
        }
        if let Some(message) = message {
            self.message = message;
        }
        self.percentage = if self.total > 0 {
            self.current as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };
    }
}

/// Last failure observed for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub category: ErrorCategory,
    pub message: String,
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id}: invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Job {
    /// Creates a new pending job
    pub fn new(
        script_id: impl Into<String>,
        arguments: HashMap<String, JsonValue>,
        priority: JobPriority,
    ) -> Self {
        Self {
            schema_version: JOB_SCHEMA_VERSION,
            id: Uuid::new_v4(),
            script_id: script_id.into(),
            arguments,
            priority,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: JobProgress::default(),
            result: None,
            last_error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            callback_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, JsonValue>) -> Self {
        self.metadata = metadata;
        self
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Claims the job for a worker
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.progress = JobProgress::default();
        Ok(())
    }

    pub fn complete(&mut self, result: ExecutionResult) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, result: ExecutionResult) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.record_failure(&result);
        self.result = Some(result);
        Ok(())
    }

    /// Marks a failed attempt that will be retried
    ///
    /// Fails without touching the job if the retry budget is already spent.
    pub fn begin_retry(&mut self, result: ExecutionResult) -> Result<(), TransitionError> {
        if self.retry_count >= self.max_retries {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to: JobStatus::Retrying,
            });
        }
        self.transition(JobStatus::Retrying)?;
        self.retry_count += 1;
        self.record_failure(&result);
        self.result = Some(result);
        Ok(())
    }

    /// Puts a retrying job back in the pending state
    pub fn requeue(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Pending)?;
        self.progress = JobProgress::default();
        Ok(())
    }

    /// Cancels a pending job; returns false for any other status
    pub fn cancel(&mut self) -> bool {
        if self.transition(JobStatus::Cancelled).is_err() {
            return false;
        }
        self.completed_at = Some(Utc::now());
        true
    }

    /// Normalizes a job whose owner is gone (restart or shutdown)
    ///
    /// Running and retrying jobs go back to pending; returns whether the job
    /// should be enqueued again.
    pub fn recover(&mut self) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Running | JobStatus::Retrying => {
                self.status = JobStatus::Pending;
                self.progress = JobProgress::default();
                true
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn record_failure(&mut self, result: &ExecutionResult) {
        if let Some(details) = &result.error_details {
            self.last_error = Some(JobFailure {
                category: details.category,
                message: details.message.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorDetails;

    fn failed_result(category: ErrorCategory) -> ExecutionResult {
        ExecutionResult::rejected(ErrorDetails::new(category, "boom"), Utc::now())
    }

    #[test]
    fn test_happy_path() {
        let mut job = Job::new("echo", HashMap::new(), JobPriority::High);
        assert_eq!(job.status, JobStatus::Pending);

        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        let mut result = failed_result(ErrorCategory::Unknown);
        result.success = true;
        result.error_details = None;
        job.complete(result).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_retry_cycle_respects_budget() {
        let mut job = Job::new("flaky", HashMap::new(), JobPriority::Normal).with_max_retries(1);

        job.start().unwrap();
        job.begin_retry(failed_result(ErrorCategory::Timeout)).unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.retry_count, 1);
        assert_eq!(
            job.last_error.as_ref().map(|e| e.category),
            Some(ErrorCategory::Timeout)
        );

        job.requeue().unwrap();
        job.start().unwrap();

        // Budget spent: the job stays running and must be failed instead
        assert!(job.begin_retry(failed_result(ErrorCategory::Timeout)).is_err());
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.status, JobStatus::Running);

        job.fail(failed_result(ErrorCategory::Timeout)).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_terminal_jobs_never_return_to_pending() {
        let mut job = Job::new("echo", HashMap::new(), JobPriority::Low);
        job.start().unwrap();
        job.fail(failed_result(ErrorCategory::Execution)).unwrap();

        assert!(job.requeue().is_err());
        assert!(job.start().is_err());
        assert!(!job.cancel());
        assert!(!job.recover());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut pending = Job::new("echo", HashMap::new(), JobPriority::Normal);
        assert!(pending.cancel());
        assert_eq!(pending.status, JobStatus::Cancelled);

        let mut running = Job::new("echo", HashMap::new(), JobPriority::Normal);
        running.start().unwrap();
        assert!(!running.cancel());
        assert_eq!(running.status, JobStatus::Running);
    }

    #[test]
    fn test_recover_demotes_running() {
        let mut job = Job::new("echo", HashMap::new(), JobPriority::Normal);
        job.start().unwrap();
        job.progress.update(50, None, Some("halfway".to_string()));

        assert!(job.recover());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress.percentage, 0.0);
    }

    #[test]
    fn test_progress_percentage() {
        let mut progress = JobProgress::default();
        progress.update(3, Some(12), Some("step 3".to_string()));
        assert_eq!(progress.percentage, 25.0);
        assert_eq!(progress.message, "step 3");

        progress.update(1, Some(0), None);
        assert_eq!(progress.percentage, 0.0);
    }

    #[test]
    fn test_persisted_record_uses_string_names() {
        let job = Job::new("echo", HashMap::new(), JobPriority::High);
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["priority"], "high");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["schema_version"], JOB_SCHEMA_VERSION);
        assert!(value["created_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("HIGH".parse::<JobPriority>(), Ok(JobPriority::High));
        assert_eq!("low".parse::<JobPriority>(), Ok(JobPriority::Low));
        assert!("urgent".parse::<JobPriority>().is_err());
    }
}
