//! Runner configuration
//!
//! Defines all configurable parameters for the execution engine and the
//! scheduler: where the registry and job records live, worker pool size,
//! retry policy, supervision cadence and retention windows.

use std::path::PathBuf;
use std::time::Duration;

use crate::sandbox::ResourceLimits;

/// Runner configuration
///
/// Every interval is configurable so tests can run the scheduler with
/// millisecond-scale timings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the `registry.json` describing available scripts
    pub registry_path: PathBuf,

    /// Directory holding one JSON record per job
    pub job_dir: PathBuf,

    /// Number of worker tasks
    pub concurrency: usize,

    /// Automatic retries granted to each job
    pub max_retries: u32,

    /// Base of the exponential backoff between attempts
    pub retry_base_delay: Duration,

    /// How long an idle worker waits on the queue before re-checking shutdown
    pub dequeue_timeout: Duration,

    /// How often a running subprocess is polled and sampled
    pub supervision_interval: Duration,

    /// Minimum spacing between progress notifications for one job
    pub progress_interval: Duration,

    /// Age after which terminal job records are deleted from disk
    pub retention: Duration,

    /// Age after which terminal jobs are evicted from the in-memory index
    pub memory_retention: Duration,

    /// How often the retention task runs
    pub retention_sweep_interval: Duration,

    /// How often the store is scanned for jobs submitted by other processes
    pub intake_interval: Duration,

    /// Kernel limits applied to every script process
    pub limits: ResourceLimits,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(registry_path: PathBuf, job_dir: PathBuf) -> Self {
        Self {
            registry_path,
            job_dir,
            concurrency: 5,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            dequeue_timeout: Duration::from_secs(1),
            supervision_interval: Duration::from_millis(100),
            progress_interval: Duration::from_secs(5),
            retention: Duration::from_secs(24 * 60 * 60),
            memory_retention: Duration::from_secs(60 * 60),
            retention_sweep_interval: Duration::from_secs(10 * 60),
            intake_interval: Duration::from_secs(2),
            limits: ResourceLimits::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - TOOLRUN_REGISTRY (default: ./registry.json)
    /// - TOOLRUN_JOB_DIR (default: ~/.toolrun/jobs)
    /// - TOOLRUN_CONCURRENCY (default: 5)
    /// - TOOLRUN_MAX_RETRIES (default: 3)
    /// - TOOLRUN_RETRY_BASE_DELAY_MS (milliseconds, default: 1000)
    /// - TOOLRUN_PROGRESS_INTERVAL (seconds, default: 5)
    /// - TOOLRUN_RETENTION_HOURS (default: 24)
    pub fn from_env() -> anyhow::Result<Self> {
        let registry_path = std::env::var("TOOLRUN_REGISTRY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_registry_path());

        let job_dir = match std::env::var("TOOLRUN_JOB_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_job_dir()?,
        };

        let mut config = Self::new(registry_path, job_dir);

        if let Some(concurrency) = std::env::var("TOOLRUN_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.concurrency = concurrency;
        }

        if let Some(max_retries) = std::env::var("TOOLRUN_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            config.max_retries = max_retries;
        }

        config.retry_base_delay = std::env::var("TOOLRUN_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(config.retry_base_delay);

        config.progress_interval = std::env::var("TOOLRUN_PROGRESS_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.progress_interval);

        config.retention = std::env::var("TOOLRUN_RETENTION_HOURS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|hours| Duration::from_secs(hours * 60 * 60))
            .unwrap_or(config.retention);

        Ok(config)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registry_path.as_os_str().is_empty() {
            anyhow::bail!("registry_path cannot be empty");
        }

        if self.job_dir.as_os_str().is_empty() {
            anyhow::bail!("job_dir cannot be empty");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.dequeue_timeout.is_zero() {
            anyhow::bail!("dequeue_timeout must be greater than 0");
        }

        if self.supervision_interval.is_zero() {
            anyhow::bail!("supervision_interval must be greater than 0");
        }

        if self.retention_sweep_interval.is_zero() {
            anyhow::bail!("retention_sweep_interval must be greater than 0");
        }

        if self.intake_interval.is_zero() {
            anyhow::bail!("intake_interval must be greater than 0");
        }

        if self.limits.max_processes == 0 {
            anyhow::bail!("limits.max_processes must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let job_dir = default_job_dir().unwrap_or_else(|_| PathBuf::from(".toolrun/jobs"));
        Self::new(default_registry_path(), job_dir)
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("registry.json")
}

/// `~/.toolrun/jobs`
pub fn default_job_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?;
    Ok(home.join(".toolrun").join("jobs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.dequeue_timeout, Duration::from_secs(1));
        assert_eq!(config.supervision_interval, Duration::from_millis(100));
        assert_eq!(config.progress_interval, Duration::from_secs(5));
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.intake_interval, Duration::from_secs(2));
        assert_eq!(config.registry_path, PathBuf::from("registry.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(config.validate().is_err());
        config.concurrency = 2;

        config.job_dir = PathBuf::new();
        assert!(config.validate().is_err());
        config.job_dir = PathBuf::from("/tmp/jobs");

        config.dequeue_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.dequeue_timeout = Duration::from_millis(50);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = Config::new("r.json".into(), "/tmp/jobs".into())
            .with_concurrency(1)
            .with_max_retries(0)
            .with_retry_base_delay(Duration::from_millis(10));

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_base_delay, Duration::from_millis(10));
    }
}
