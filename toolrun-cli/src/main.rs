//! Toolrun CLI
//!
//! Command-line entry point: runs a registered script inline, or submits it
//! as a durable job for `toolrun-runner`, and inspects persisted jobs.

mod commands;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use toolrun_core::domain::job::JobPriority;
use toolrun_runner::config::Config;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Action, handle_action};
use types::parse_script_args;

#[derive(Parser)]
#[command(name = "toolrun")]
#[command(about = "Execute registered scripts", long_about = None)]
struct Cli {
    /// Script ID from the registry
    #[arg(required_unless_present_any = ["status", "cancel", "stats"])]
    script_id: Option<String>,

    /// Path to registry.json
    #[arg(long, env = "TOOLRUN_REGISTRY", default_value = "registry.json")]
    registry: PathBuf,

    /// Directory holding job records (default: ~/.toolrun/jobs)
    #[arg(long, env = "TOOLRUN_JOB_DIR")]
    job_dir: Option<PathBuf>,

    /// Script argument in key=value format (repeatable)
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    args: Vec<String>,

    /// Output result as JSON
    #[arg(long)]
    json: bool,

    /// Submit as a background job instead of running inline
    #[arg(long = "async")]
    detach: bool,

    /// Job priority for background execution
    #[arg(long, default_value = "normal", value_parser = parse_priority)]
    priority: JobPriority,

    /// Show a job by ID or unambiguous prefix
    #[arg(long, value_name = "JOB_ID", conflicts_with_all = ["cancel", "stats"])]
    status: Option<String>,

    /// Cancel a pending job by ID or unambiguous prefix
    #[arg(long, value_name = "JOB_ID", conflicts_with = "stats")]
    cancel: Option<String>,

    /// Show execution statistics
    #[arg(long)]
    stats: bool,
}

fn parse_priority(value: &str) -> Result<JobPriority, String> {
    value.parse()
}

impl Cli {
    fn into_action(self) -> Result<Action> {
        if let Some(id) = self.status {
            return Ok(Action::Status { id });
        }
        if let Some(id) = self.cancel {
            return Ok(Action::Cancel { id });
        }
        if self.stats {
            return Ok(Action::Stats {
                script_id: self.script_id,
            });
        }

        let script_id = self
            .script_id
            .ok_or_else(|| anyhow::anyhow!("script_id is required"))?;
        let arguments = parse_script_args(&self.args)?;

        Ok(if self.detach {
            Action::Submit {
                script_id,
                arguments,
                priority: self.priority,
            }
        } else {
            Action::Execute {
                script_id,
                arguments,
            }
        })
    }
}

fn load_config(registry: PathBuf, job_dir: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::from_env().unwrap_or_else(|e| {
        debug!("Failed to load config from environment ({}), using defaults", e);
        Config::default()
    });
    config.registry_path = registry;
    if let Some(job_dir) = job_dir {
        config.job_dir = job_dir;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays the script's output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolrun_runner=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    let config = load_config(cli.registry.clone(), cli.job_dir.clone())?;
    let action = cli.into_action()?;

    let code = handle_action(action, &config, json).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
