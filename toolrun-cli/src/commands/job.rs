//! Job command handlers
//!
//! Inspects and cancels persisted jobs. Both commands work on the job store
//! directly, so they never disturb a runner daemon that owns the queue.

use anyhow::{Context, Result, anyhow};
use colored::*;
use toolrun_core::domain::job::{Job, JobStatus};
use toolrun_core::dto::job::JobStatusReport;
use toolrun_runner::config::Config;
use toolrun_runner::repository::{FileJobStore, JobStore};

use crate::commands::execute::print_failure;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

fn open_store(config: &Config) -> Result<FileJobStore> {
    FileJobStore::open(&config.job_dir)
        .with_context(|| format!("Failed to open job store at {}", config.job_dir.display()))
}

fn load_job(store: &FileJobStore, id: &str) -> Result<Job> {
    let id_or_prefix = IdOrPrefix::parse(id);
    let uuid = resolve_job_id(store, &id_or_prefix)?;

    store
        .load(uuid)
        .context("Failed to read job record")?
        .ok_or_else(|| anyhow!("Job {} not found", uuid))
}

/// Get and display a single job
pub fn show_status(config: &Config, id: &str, json: bool) -> Result<i32> {
    let store = open_store(config)?;
    let job = load_job(&store, id)?;

    if json {
        let report = JobStatusReport::from(&job);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_job_details(&job);
    }

    Ok(0)
}

/// Cancel a pending job
///
/// The check and the write happen under the store lock, so a runner that
/// claims the job at the same moment either sees the cancellation or makes
/// this command refuse. Returns 1 when the job has already left the pending
/// state.
pub fn cancel(config: &Config, id: &str) -> Result<i32> {
    let store = open_store(config)?;
    let job = load_job(&store, id)?;

    let mut current = None;
    let cancelled = store
        .update(job.id, &mut |stored| {
            let mut stored = stored?;
            if stored.cancel() {
                return Some(stored);
            }
            current = Some(stored.status);
            None
        })
        .context("Failed to persist cancellation")?;

    if cancelled.is_none() {
        let status = current.unwrap_or(job.status);
        println!(
            "{}",
            format!(
                "Job {} is {}; only pending jobs can be cancelled.",
                job.id, status
            )
            .yellow()
        );
        return Ok(1);
    }

    println!("{} {}", "✓ Cancelled job".green(), job.id.to_string().cyan());
    Ok(0)
}

/// Print detailed job information
fn print_job_details(job: &Job) {
    let status_colored = colorize_status(&job.status);

    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Script:      {}", job.script_id);
    println!("  Status:      {}", status_colored);
    println!("  Priority:    {}", job.priority);
    println!(
        "  Created:     {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    println!("  Retries:     {}/{}", job.retry_count, job.max_retries);

    if !job.is_terminal() && job.status != JobStatus::Pending {
        println!(
            "  Progress:    {:.0}% {}",
            job.progress.percentage,
            job.progress.message.dimmed()
        );
    }

    if !job.arguments.is_empty() {
        println!("\n{}", "Arguments:".bold());
        let mut names: Vec<_> = job.arguments.keys().collect();
        names.sort();
        for name in names {
            println!("  {} = {}", name.cyan(), job.arguments[name]);
        }
    }

    if let Some(error) = &job.last_error {
        println!("\n{}", "Last Error:".bold());
        println!("  [{}] {}", error.category, error.message.red());
    }

    if let Some(result) = &job.result {
        println!("\n{}", "Result:".bold());
        println!(
            "  Success:    {}",
            if result.success {
                "✓".green()
            } else {
                "✗".red()
            }
        );
        println!("  Exit Code:  {}", result.exit_code);

        if !result.outputs.is_empty() {
            println!("\n{}", "Outputs:".bold());
            if let Ok(pretty) = serde_json::to_string_pretty(&result.outputs) {
                println!("{}", pretty);
            }
        }

        if result.success {
            if !result.stdout.is_empty() {
                println!("\n{}", "Output:".bold());
                print!("{}", result.stdout);
            }
        } else if job.is_terminal() {
            println!();
            print_failure(result);
        }
    }
}

/// Colorize job status for display
fn colorize_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Retrying => status_str.magenta(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use toolrun_core::domain::job::JobPriority;

    fn config(dir: &std::path::Path) -> Config {
        Config::new(dir.join("registry.json"), dir.join("jobs"))
    }

    #[test]
    fn test_cancel_pending_job_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = FileJobStore::open(&config.job_dir).unwrap();
        let job = Job::new("echo", HashMap::new(), JobPriority::Low);
        store.save(&job).unwrap();

        let code = cancel(&config, &job.id.to_string()[..8]).unwrap();
        assert_eq!(code, 0);
        assert_eq!(
            store.load(job.id).unwrap().unwrap().status,
            JobStatus::Cancelled
        );

        assert_eq!(cancel(&config, &job.id.to_string()).unwrap(), 1);
    }

    #[test]
    fn test_cancel_leaves_running_job_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = FileJobStore::open(&config.job_dir).unwrap();
        let mut job = Job::new("echo", HashMap::new(), JobPriority::Normal);
        job.start().unwrap();
        store.save(&job).unwrap();

        assert_eq!(cancel(&config, &job.id.to_string()).unwrap(), 1);
        let stored = store.load(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert!(stored.completed_at.is_none());
    }

    #[test]
    fn test_status_of_unknown_job_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        assert!(show_status(&config, "deadbeef", true).is_err());
    }
}
