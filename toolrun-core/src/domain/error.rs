//! Error taxonomy domain types
//!
//! Script failures are values, not Rust errors: every failed attempt carries
//! an [`ErrorDetails`] whose category decides whether it may be retried.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Classification of an execution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Timeout,
    Validation,
    Dependency,
    Execution,
    Permission,
    Resource,
    Unknown,
}

impl ErrorCategory {
    /// Whether a failure of this category may resolve on its own
    ///
    /// Validation, dependency, permission and execution failures need a human
    /// or a calling layer to fix the root cause; retrying them is pointless.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout | ErrorCategory::Resource | ErrorCategory::Unknown
        )
    }

    /// Human-readable explanation of the retry decision for this category
    pub fn retry_reason(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "Temporary performance issue or system load",
            ErrorCategory::Resource => "Temporary resource constraint",
            ErrorCategory::Unknown => "Transient error that may resolve on retry",
            ErrorCategory::Validation => "Input validation errors require user correction",
            ErrorCategory::Dependency => "Missing dependencies must be installed",
            ErrorCategory::Permission => "Permission issues require manual intervention",
            ErrorCategory::Execution => "Script logic errors need debugging",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry bookkeeping attached to a failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub is_retryable: bool,
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Delay before the next attempt, if one will be made
    pub next_delay_ms: Option<u64>,
    pub reason: String,
}

/// Full description of a failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, JsonValue>,
    /// Ordered remediation suggestions, most relevant first
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub raw_error: Option<String>,
    #[serde(default)]
    pub retry_info: Option<RetryInfo>,
}

impl ErrorDetails {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            context: Map::new(),
            suggestions: Vec::new(),
            raw_error: None,
            retry_info: None,
        }
    }

    /// Adds a context entry, replacing any previous value for the key
    pub fn with_context(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn with_raw_error(mut self, raw: impl Into<String>) -> Self {
        self.raw_error = Some(raw.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}
