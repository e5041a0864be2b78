//! Statistics command
//!
//! Summarizes the persisted jobs: counts per status and per-script
//! execution totals derived from the last attempt of every finished job.

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use toolrun_core::domain::job::{Job, JobStatus};
use toolrun_core::dto::stats::ScriptStats;
use toolrun_runner::config::Config;
use toolrun_runner::repository::{FileJobStore, JobStore};

/// Store-wide summary printed by `--stats`
#[derive(Debug, Default, Serialize)]
struct StoreSummary {
    total_jobs: usize,
    status_counts: BTreeMap<String, usize>,
    scripts: BTreeMap<String, ScriptStats>,
}

fn summarize(jobs: &[Job], script_id: Option<&str>) -> StoreSummary {
    let mut summary = StoreSummary::default();
    let mut counts: HashMap<JobStatus, usize> = HashMap::new();

    for job in jobs {
        if script_id.is_some_and(|id| id != job.script_id) {
            continue;
        }
        summary.total_jobs += 1;
        *counts.entry(job.status).or_insert(0) += 1;

        let Some(result) = job.result.as_ref().filter(|_| job.is_terminal()) else {
            continue;
        };
        let stats = summary.scripts.entry(job.script_id.clone()).or_default();
        let previous = stats.last_execution;
        stats.record(result.success, result.execution_time_ms);
        stats.last_execution = previous.max(Some(result.finished_at));
    }

    summary.status_counts = counts
        .into_iter()
        .map(|(status, count)| (status.to_string(), count))
        .collect();
    summary
}

/// Show job statistics, optionally for one script
pub fn show_stats(config: &Config, script_id: Option<&str>, json: bool) -> Result<i32> {
    let store = FileJobStore::open(&config.job_dir)
        .with_context(|| format!("Failed to open job store at {}", config.job_dir.display()))?;
    let jobs = store.list_all().context("Failed to list jobs")?;
    let summary = summarize(&jobs, script_id);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(0);
    }

    println!(
        "{} {}",
        "Job store:".bold(),
        config.job_dir.display().to_string().dimmed()
    );
    if summary.total_jobs == 0 {
        println!("{}", "No jobs found.".yellow());
        return Ok(0);
    }

    println!("{}", format!("Found {} job(s):", summary.total_jobs).bold());
    for (status, count) in &summary.status_counts {
        println!("  {:<10} {}", status, count);
    }

    if !summary.scripts.is_empty() {
        println!("\n{}", "Execution Statistics:".bold());
        for (id, stats) in &summary.scripts {
            println!("  {} {}", "▸".cyan(), id);
            println!("    Executions:  {}", stats.total_executions);
            println!(
                "    Failures:    {} ({:.1}%)",
                stats.total_failures,
                stats.failure_rate() * 100.0
            );
            println!("    Avg time:    {:.0}ms", stats.avg_execution_time_ms);
            if let Some(last) = stats.last_execution {
                println!(
                    "    Last run:    {}",
                    last.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
                );
            }
        }
    }

    Ok(0)
}
