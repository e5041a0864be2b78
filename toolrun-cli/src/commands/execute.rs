//! Script execution commands
//!
//! Runs a script inline (with automatic retries) or submits it as a durable
//! job for the runner daemon, and renders the result.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::Arc;
use toolrun_core::domain::error::ErrorDetails;
use toolrun_core::domain::execution::{ExecutionResult, PRE_EXECUTION_EXIT_CODE};
use toolrun_core::domain::job::{Job, JobPriority};
use toolrun_runner::config::Config;
use toolrun_runner::engine::validation::validate_arguments;
use toolrun_runner::engine::{ProgressSink, classify};
use toolrun_runner::registry::{JsonRegistry, ScriptRegistry};
use toolrun_runner::repository::{FileJobStore, JobStore};
use toolrun_runner::retry::{RetryCoordinator, RetryPolicy};
use toolrun_runner::service::{ExecutionService, StandardExecutionService};

/// Structured result printed with `--json`
#[derive(Serialize)]
struct ExecutionReport<'a> {
    #[serde(flatten)]
    result: &'a ExecutionResult,
    retry_count: u32,
}

/// Structured submission receipt printed with `--json`
#[derive(Serialize)]
struct SubmissionReport<'a> {
    job_id: String,
    script_id: &'a str,
    priority: JobPriority,
    status: &'static str,
}

fn load_registry(config: &Config) -> Result<Arc<dyn ScriptRegistry>> {
    let registry = JsonRegistry::load(&config.registry_path).with_context(|| {
        format!(
            "Failed to load registry from {}",
            config.registry_path.display()
        )
    })?;
    Ok(Arc::new(registry))
}

/// Runs a script in this process and returns the exit code to report
pub async fn execute_inline(
    config: &Config,
    script_id: &str,
    arguments: HashMap<String, JsonValue>,
    json: bool,
) -> Result<i32> {
    let registry = load_registry(config)?;
    let service: Arc<dyn ExecutionService> =
        Arc::new(StandardExecutionService::new(registry.clone(), config));
    let coordinator = RetryCoordinator::new(service, RetryPolicy::from_config(config));

    let (result, retries) = match registry.get_script(script_id) {
        Some(descriptor) => {
            let progress = (!json && std::io::stderr().is_terminal()).then(progress_printer);
            coordinator
                .execute_with_retry(&descriptor, &arguments, progress)
                .await
        }
        None => (
            ExecutionResult::rejected(classify::describe_unknown_script(script_id), Utc::now()),
            0,
        ),
    };

    if json {
        let report = ExecutionReport {
            result: &result,
            retry_count: retries,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if result.success {
        print_success(&result, retries);
    } else {
        print_failure(&result);
    }

    Ok(exit_code(&result))
}

/// Persists a pending job for the runner daemon and returns immediately
///
/// Unknown scripts and invalid arguments are rejected before anything is
/// written, since no retry could fix them.
pub fn submit_detached(
    config: &Config,
    script_id: &str,
    arguments: HashMap<String, JsonValue>,
    priority: JobPriority,
    json: bool,
) -> Result<i32> {
    let registry = load_registry(config)?;

    let rejection = match registry.get_script(script_id) {
        None => Some(classify::describe_unknown_script(script_id)),
        Some(descriptor) => validate_arguments(&descriptor, &arguments)
            .err()
            .map(|e| classify::describe_arguments(&e, &descriptor, &registry.resolve_path(&descriptor))),
    };
    if let Some(details) = rejection {
        return reject(details, json);
    }

    let store = FileJobStore::open(&config.job_dir).with_context(|| {
        format!("Failed to open job store at {}", config.job_dir.display())
    })?;
    let job = Job::new(script_id, arguments, priority).with_max_retries(config.max_retries);
    store.save(&job).context("Failed to persist job")?;

    if json {
        let report = SubmissionReport {
            job_id: job.id.to_string(),
            script_id,
            priority,
            status: job.status.as_str(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} {}", "Job submitted:".green().bold(), job.id.to_string().cyan());
        println!(
            "{}",
            format!(
                "  Priority {}; a running toolrun-runner picks it up. Check it with --status {}",
                priority,
                &job.id.to_string()[..8]
            )
            .dimmed()
        );
    }

    Ok(0)
}

fn reject(details: ErrorDetails, json: bool) -> Result<i32> {
    let result = ExecutionResult::rejected(details, Utc::now());
    if json {
        let report = ExecutionReport {
            result: &result,
            retry_count: 0,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_failure(&result);
    }
    Ok(exit_code(&result))
}

fn exit_code(result: &ExecutionResult) -> i32 {
    match (result.success, result.exit_code) {
        (true, _) => 0,
        (false, 0) => PRE_EXECUTION_EXIT_CODE,
        (false, code) => code,
    }
}

fn progress_printer() -> ProgressSink {
    Arc::new(|percentage: u8, message: String| {
        eprintln!("{}", format!("[{:>3}%] {}", percentage, message).dimmed());
    })
}

fn print_success(result: &ExecutionResult, retries: u32) {
    print!("{}", result.stdout);

    if !result.outputs.is_empty() {
        println!("\n{}", "Outputs:".bold());
        for (key, value) in &result.outputs {
            println!("  {}: {}", key.cyan(), render_value(value));
        }
    }

    if retries > 0 {
        eprintln!(
            "{}",
            format!("Succeeded after {} retr{}", retries, if retries == 1 { "y" } else { "ies" })
                .dimmed()
        );
    }
}

/// Prints a failed result to stderr
pub fn print_failure(result: &ExecutionResult) {
    eprintln!(
        "{} {}",
        "Error:".red().bold(),
        result.error_message().unwrap_or("Script failed")
    );

    if !result.stderr.is_empty() {
        eprintln!("{}\n{}", "Script error output:".bold(), result.stderr.trim_end());
    }

    let Some(details) = &result.error_details else {
        return;
    };

    eprintln!("\n{} {}", "Error Category:".bold(), details.category.to_string().yellow());

    if let Some(raw) = &details.raw_error {
        eprintln!("{} {}", "Raw Error:".bold(), raw.dimmed());
    }

    if !details.context.is_empty() {
        eprintln!("\n{}", "Error Context:".bold());
        for (key, value) in &details.context {
            eprintln!("  {}: {}", key.cyan(), render_value(value));
        }
    }

    if let Some(retry) = &details.retry_info {
        eprintln!("\n{}", "Retry Information:".bold());
        eprintln!("  Retryable: {}", retry.is_retryable);
        eprintln!("  Attempts:  {}/{}", retry.attempts_made, retry.max_attempts);
        eprintln!("  Reason:    {}", retry.reason);
    }

    if !details.suggestions.is_empty() {
        eprintln!("\n{}", "Suggestions for resolution:".bold());
        for (i, suggestion) in details.suggestions.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, suggestion);
        }
    }
}

fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
