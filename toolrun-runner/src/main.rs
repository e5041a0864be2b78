//! Toolrun Runner
//!
//! Long-running worker daemon. Recovers persisted jobs, runs them through
//! the worker pool and keeps picking up jobs submitted with `toolrun --async`
//! until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolrun_runner::config::Config;
use toolrun_runner::registry::{JsonRegistry, ScriptRegistry};
use toolrun_runner::retry::{RetryCoordinator, RetryPolicy};
use toolrun_runner::scheduler::JobQueue;
use toolrun_runner::service::{ExecutionService, StandardExecutionService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolrun_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Toolrun Runner");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: registry={}, job_dir={}, concurrency={}",
        config.registry_path.display(),
        config.job_dir.display(),
        config.concurrency
    );

    // Load script registry
    let registry = JsonRegistry::load(&config.registry_path).with_context(|| {
        format!(
            "Failed to load registry from {}",
            config.registry_path.display()
        )
    })?;
    info!("Registry loaded with {} script(s)", registry.len());
    let registry: Arc<dyn ScriptRegistry> = Arc::new(registry);

    // Initialize services
    let execution_service: Arc<dyn ExecutionService> =
        Arc::new(StandardExecutionService::new(registry.clone(), &config));
    let coordinator = Arc::new(RetryCoordinator::new(
        execution_service,
        RetryPolicy::from_config(&config),
    ));

    info!("Services initialized");

    // Open the scheduler (recovers persisted jobs)
    let queue = JobQueue::open(config.clone(), registry, coordinator)
        .context("Failed to open job store")?;
    queue.start();

    info!(
        "Runner initialized successfully, retry base delay {:?}, progress interval {:?}",
        config.retry_base_delay, config.progress_interval
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown requested, waiting for running jobs");
    queue.stop(true).await;

    let stats = queue.get_stats();
    info!(
        "Final stats: submitted={}, completed={}, failed={}, queued={}",
        stats.total_submitted, stats.total_completed, stats.total_failed, stats.queue_size
    );
    for (script_id, script_stats) in queue.coordinator().stats(None) {
        info!(
            "  - {}: {} execution(s), {:.1}% failed, avg {:.0}ms",
            script_id,
            script_stats.total_executions,
            script_stats.failure_rate() * 100.0,
            script_stats.avg_execution_time_ms
        );
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            warn!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
