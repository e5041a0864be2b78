//! Failure classification
//!
//! Maps spawn/IO failures and process outcomes to an [`ErrorCategory`] and
//! builds the [`ErrorDetails`] attached to failed results.

use std::io;
use std::path::Path;
use thiserror::Error;
use toolrun_core::domain::error::{ErrorCategory, ErrorDetails};
use toolrun_core::domain::script::ScriptDescriptor;

use crate::engine::validation::ArgumentError;
use crate::sandbox::SandboxPolicy;

/// Failure to launch or talk to a script process
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for script process: {0}")]
    Wait(#[source] io::Error),

    #[error("Failed to read script output: {0}")]
    Output(#[source] io::Error),
}

impl LaunchError {
    pub fn io_error(&self) -> &io::Error {
        match self {
            LaunchError::Spawn { source, .. } => source,
            LaunchError::Wait(e) | LaunchError::Output(e) => e,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        category_for_io(self.io_error().kind())
    }
}

/// Classifies an IO failure by its kind
pub fn category_for_io(kind: io::ErrorKind) -> ErrorCategory {
    match kind {
        io::ErrorKind::NotFound => ErrorCategory::Dependency,
        io::ErrorKind::PermissionDenied => ErrorCategory::Permission,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorCategory::Validation,
        io::ErrorKind::OutOfMemory => ErrorCategory::Resource,
        _ => ErrorCategory::Unknown,
    }
}

/// Category for a process killed by `signal`
pub fn category_for_signal(signal: i32) -> ErrorCategory {
    if signal == libc::SIGXCPU || signal == libc::SIGXFSZ {
        ErrorCategory::Resource
    } else {
        ErrorCategory::Execution
    }
}

/// Builds error details with the context and suggestions for `category`
pub fn describe(
    category: ErrorCategory,
    message: impl Into<String>,
    descriptor: &ScriptDescriptor,
    script_path: &Path,
) -> ErrorDetails {
    let mut details = ErrorDetails::new(category, message)
        .with_context("script_id", descriptor.id.as_str())
        .with_context("script_path", script_path.to_string_lossy().into_owned());
    if let Some(specialist) = &descriptor.specialist {
        details = details.with_context("specialist", specialist.as_str());
    }

    match category {
        ErrorCategory::Timeout => {
            details = details.with_context("timeout_ms", descriptor.timeout_ms());
        }
        ErrorCategory::Dependency => {
            details = details.with_context("missing_file", script_path.to_string_lossy().into_owned());
        }
        ErrorCategory::Permission => {
            let policy = SandboxPolicy::for_script(descriptor);
            details = details
                .with_context(
                    "required_permissions",
                    serde_json::to_value(&descriptor.execution.permissions).unwrap_or_default(),
                )
                .with_context("sandbox_level", descriptor.security.sandbox.to_string())
                .with_context("filesystem", policy.filesystem().to_string())
                .with_context("network", policy.network().to_string());
        }
        ErrorCategory::Resource => {
            details = details.with_context("memory_limit", descriptor.security.max_memory.as_str());
        }
        ErrorCategory::Validation | ErrorCategory::Execution | ErrorCategory::Unknown => {}
    }

    details.with_suggestions(suggestions_for(category).iter().copied())
}

/// Error details for rejected arguments
pub fn describe_arguments(
    error: &ArgumentError,
    descriptor: &ScriptDescriptor,
    script_path: &Path,
) -> ErrorDetails {
    let mut details = ErrorDetails::new(ErrorCategory::Validation, error.to_string())
        .with_context("script_id", descriptor.id.as_str())
        .with_context("script_path", script_path.to_string_lossy().into_owned());

    let offending = error.arguments();
    details = if let [single] = offending.as_slice() {
        details.with_context("argument", *single)
    } else {
        details.with_context("arguments", offending)
    };

    let suggestions = match error {
        ArgumentError::Missing { .. } => MISSING_ARGUMENT_SUGGESTIONS,
        ArgumentError::InvalidType { .. } => INVALID_TYPE_SUGGESTIONS,
        ArgumentError::NotAllowed { .. } | ArgumentError::Unknown { .. } => VALIDATION_SUGGESTIONS,
    };
    details.with_suggestions(suggestions.iter().copied())
}

/// Error details for a script id the registry does not know
pub fn describe_unknown_script(script_id: &str) -> ErrorDetails {
    ErrorDetails::new(
        ErrorCategory::Validation,
        format!("Script not found: {}", script_id),
    )
    .with_context("script_id", script_id)
    .with_suggestions([
        "Check the script id for typos",
        "List registered scripts in registry.json",
    ])
}

/// Error details for a failed launch
pub fn describe_launch(
    error: &LaunchError,
    descriptor: &ScriptDescriptor,
    script_path: &Path,
) -> ErrorDetails {
    let io_error = error.io_error();
    let mut details = describe(error.category(), error.to_string(), descriptor, script_path)
        .with_raw_error(io_error.to_string())
        .with_context("error_kind", format!("{:?}", io_error.kind()));
    if let Some(errno) = io_error.raw_os_error() {
        details = details.with_context("errno", errno);
    }
    details
}

fn suggestions_for(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::Timeout => &[
            "Increase the timeout value in the script configuration",
            "Reduce the amount of data processed per run or paginate large inputs",
            "Check for infinite loops or blocking operations",
            "Submit the script asynchronously with --async",
            "Profile the script to find the slow section",
        ],
        ErrorCategory::Dependency => &[
            "Verify the script file exists at the specified path",
            "Check that the interpreter is installed and on the expected path",
            "Install the dependencies the script needs",
            "Check file system permissions for the script directory",
        ],
        ErrorCategory::Permission => &[
            "Check file permissions with: ls -la <script>",
            "Make the script executable with: chmod +x <script>",
            "Verify the sandbox level allows the required operations",
            "Review the script's permissions in registry.json",
            "Check parent directory permissions",
        ],
        ErrorCategory::Resource => &[
            "Increase max_memory in the script's security settings",
            "Process data in chunks instead of loading it all at once",
            "Check the script for memory leaks",
            "Keep written files under the file size limit",
        ],
        ErrorCategory::Execution => &[
            "Check the script's stderr for specific error details",
            "Verify all input data is in the expected format",
            "Run the script manually to debug the issue",
            "Ensure the environment variables the script needs are granted",
        ],
        ErrorCategory::Unknown => &[
            "Check system logs for more details",
            "Verify the execution environment is configured correctly",
            "Try running the script with minimal arguments",
            "Check for system-level issues such as disk space",
        ],
        ErrorCategory::Validation => VALIDATION_SUGGESTIONS,
    }
}

const VALIDATION_SUGGESTIONS: &[&str] = &[
    "Check the argument types and formats",
    "Verify required arguments are provided",
    "Review the script's argument definitions in registry.json",
];

const MISSING_ARGUMENT_SUGGESTIONS: &[&str] = &[
    "Provide all required arguments with --arg name=value",
    "Check the script registry for argument specifications",
];

const INVALID_TYPE_SUGGESTIONS: &[&str] = &[
    "Verify the value type matches the declared type",
    "For arrays, use JSON: '[\"item1\", \"item2\"]'",
    "For objects, use JSON: '{\"key\": \"value\"}'",
    "For booleans, use: true/false (lowercase)",
];
