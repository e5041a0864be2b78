//! Commands module
//!
//! Maps the parsed command line onto one action and routes it to its handler.

mod execute;
mod job;
mod stats;

use anyhow::Result;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use toolrun_core::domain::job::JobPriority;
use toolrun_runner::config::Config;

/// What a single invocation does
#[derive(Debug)]
pub enum Action {
    /// Run the script in this process and wait for the result
    Execute {
        script_id: String,
        arguments: HashMap<String, JsonValue>,
    },
    /// Persist a job for the runner daemon and return its id
    Submit {
        script_id: String,
        arguments: HashMap<String, JsonValue>,
        priority: JobPriority,
    },
    /// Show one job
    Status { id: String },
    /// Cancel a pending job
    Cancel { id: String },
    /// Summarize persisted jobs
    Stats { script_id: Option<String> },
}

/// Handle an action
///
/// # Returns
/// The process exit code: 0 on success, the script's exit code for a failed
/// run, or -1 when the script never started
pub async fn handle_action(action: Action, config: &Config, json: bool) -> Result<i32> {
    match action {
        Action::Execute {
            script_id,
            arguments,
        } => execute::execute_inline(config, &script_id, arguments, json).await,
        Action::Submit {
            script_id,
            arguments,
            priority,
        } => execute::submit_detached(config, &script_id, arguments, priority, json),
        Action::Status { id } => job::show_status(config, &id, json),
        Action::Cancel { id } => job::cancel(config, &id),
        Action::Stats { script_id } => stats::show_stats(config, script_id.as_deref(), json),
    }
}
