//! Execution result domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::domain::error::ErrorDetails;

/// Exit code reported when the script never ran or was killed by the runner
pub const PRE_EXECUTION_EXIT_CODE: i32 = -1;

/// Result of a single execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Declared outputs parsed from stdout
    #[serde(default)]
    pub outputs: Map<String, JsonValue>,
    /// Wall-clock duration of the attempt in milliseconds
    pub execution_time_ms: u64,
    #[serde(default)]
    pub resource_usage: Option<ResourceUsage>,
    #[serde(default)]
    pub error_details: Option<ErrorDetails>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Zero-based attempt number this result belongs to
    #[serde(default)]
    pub attempt: u32,
}

impl ExecutionResult {
    /// Builds a failed result for an attempt that never spawned a process
    pub fn rejected(details: ErrorDetails, started_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            exit_code: PRE_EXECUTION_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            outputs: Map::new(),
            execution_time_ms: 0,
            resource_usage: None,
            error_details: Some(details),
            started_at,
            finished_at: Utc::now(),
            attempt: 0,
        }
    }

    /// Short error message, if the attempt failed
    pub fn error_message(&self) -> Option<&str> {
        self.error_details.as_ref().map(|d| d.message.as_str())
    }

    pub fn execution_time_secs(&self) -> f64 {
        self.execution_time_ms as f64 / 1000.0
    }
}

/// Resource usage of the supervised subprocess
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub start_memory_mb: f64,
    pub end_memory_mb: f64,
    pub peak_memory_mb: f64,
    pub cpu_time_seconds: f64,
    pub wall_time_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorCategory;

    #[test]
    fn test_rejected_result() {
        let details = ErrorDetails::new(ErrorCategory::Validation, "Missing required argument: url");
        let result = ExecutionResult::rejected(details, Utc::now());

        assert!(!result.success);
        assert_eq!(result.exit_code, PRE_EXECUTION_EXIT_CODE);
        assert!(result.outputs.is_empty());
        assert_eq!(result.error_message(), Some("Missing required argument: url"));
        assert!(result.finished_at >= result.started_at);
    }
}
