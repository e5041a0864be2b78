//! Execution service
//!
//! Runs one attempt of a registered script:
//! - Validating arguments against the descriptor
//! - Checking the script file and memory ceiling
//! - Building the sandboxed command and supervising the process
//! - Parsing outputs and classifying failures
//!
//! Failures are returned as [`ExecutionResult`] values, never as errors.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use toolrun_core::domain::error::{ErrorCategory, ErrorDetails};
use toolrun_core::domain::execution::{ExecutionResult, PRE_EXECUTION_EXIT_CODE};
use toolrun_core::domain::script::ScriptDescriptor;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::classify::{describe, describe_arguments, describe_launch};
use crate::engine::command::build_args;
use crate::engine::outputs::parse_outputs;
use crate::engine::supervisor::{LaunchSpec, PreflightError, SupervisedRun, preflight};
use crate::engine::validation::validate_arguments;
use crate::engine::{ProgressSink, Supervisor, Termination, classify};
use crate::registry::ScriptRegistry;
use crate::sandbox::{ProcessLimits, ResourceLimits, SandboxPolicy, parse_memory_limit};

/// Service trait for executing a single attempt of a script
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes one attempt
    ///
    /// # Arguments
    /// * `descriptor` - Registry entry of the script
    /// * `arguments` - Named arguments supplied by the caller
    /// * `attempt` - Zero-based attempt number, recorded on the result
    /// * `progress` - Optional sink for running progress
    async fn execute(
        &self,
        descriptor: &ScriptDescriptor,
        arguments: &HashMap<String, JsonValue>,
        attempt: u32,
        progress: Option<ProgressSink>,
    ) -> ExecutionResult;
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    registry: Arc<dyn ScriptRegistry>,
    supervisor: Supervisor,
    limits: ResourceLimits,
}

impl StandardExecutionService {
    /// Creates a new execution service resolving scripts through `registry`
    pub fn new(registry: Arc<dyn ScriptRegistry>, config: &Config) -> Self {
        Self {
            registry,
            supervisor: Supervisor::new(config.supervision_interval, config.progress_interval),
            limits: config.limits,
        }
    }

    fn finish(
        &self,
        descriptor: &ScriptDescriptor,
        script_path: &Path,
        run: SupervisedRun,
        started_at: chrono::DateTime<Utc>,
        memory_limit: u64,
    ) -> ExecutionResult {
        let execution_time_ms = (run.usage.wall_time_seconds * 1000.0) as u64;
        let mut result = ExecutionResult {
            success: false,
            exit_code: PRE_EXECUTION_EXIT_CODE,
            stdout: run.stdout,
            stderr: run.stderr,
            outputs: Map::new(),
            execution_time_ms,
            resource_usage: Some(run.usage),
            error_details: None,
            started_at,
            finished_at: Utc::now(),
            attempt: 0,
        };

        let termination = match run.outcome {
            Ok(termination) => termination,
            Err(error) => {
                warn!("Script {} failed to run: {}", descriptor.id, error);
                result.error_details = Some(describe_launch(&error, descriptor, script_path));
                return result;
            }
        };

        result.outputs = parse_outputs(&result.stdout, &descriptor.outputs);

        match termination {
            Termination::Exited(0) => {
                result.success = true;
                result.exit_code = 0;
            }
            Termination::Exited(code) => {
                result.exit_code = code;
                result.error_details = Some(
                    describe(
                        ErrorCategory::Execution,
                        format!("Script exited with code {}", code),
                        descriptor,
                        script_path,
                    )
                    .with_context("exit_code", code),
                );
            }
            Termination::Signaled(signal) => {
                let category = classify::category_for_signal(signal);
                result.exit_code = 128 + signal;
                let mut details = describe(
                    category,
                    format!("Script terminated by signal {}", signal),
                    descriptor,
                    script_path,
                )
                .with_context("exit_code", result.exit_code)
                .with_context("signal", signal);
                if category == ErrorCategory::Resource {
                    details = details.with_context("memory_limit_bytes", memory_limit);
                }
                result.error_details = Some(details);
            }
            Termination::TimedOut => {
                result.outputs = Map::new();
                result.error_details = Some(describe(
                    ErrorCategory::Timeout,
                    format!("Script execution timed out after {}ms", descriptor.timeout_ms()),
                    descriptor,
                    script_path,
                ));
            }
        }
        result
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute(
        &self,
        descriptor: &ScriptDescriptor,
        arguments: &HashMap<String, JsonValue>,
        attempt: u32,
        progress: Option<ProgressSink>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let script_path = self.registry.resolve_path(descriptor);

        let rejected = |details: ErrorDetails| {
            let mut result = ExecutionResult::rejected(details, started_at);
            result.attempt = attempt;
            result
        };

        if let Err(error) = validate_arguments(descriptor, arguments) {
            debug!("Rejected arguments for {}: {}", descriptor.id, error);
            return rejected(describe_arguments(&error, descriptor, &script_path));
        }

        match preflight(&script_path) {
            Ok(()) => {}
            Err(PreflightError::NotFound) => {
                return rejected(describe(
                    ErrorCategory::Dependency,
                    format!("Script file not found: {}", script_path.display()),
                    descriptor,
                    &script_path,
                ));
            }
            Err(PreflightError::NotExecutable) => {
                return rejected(describe(
                    ErrorCategory::Permission,
                    format!("Script is not executable: {}", script_path.display()),
                    descriptor,
                    &script_path,
                ));
            }
        }

        let Some(memory_limit) = parse_memory_limit(&descriptor.security.max_memory) else {
            return rejected(
                describe(
                    ErrorCategory::Validation,
                    format!("Invalid memory limit: {}", descriptor.security.max_memory),
                    descriptor,
                    &script_path,
                )
                .with_context("memory_limit", descriptor.security.max_memory.as_str()),
            );
        };

        let policy = SandboxPolicy::for_script(descriptor);
        let timeout = Duration::from_millis(descriptor.timeout_ms());
        let spec = LaunchSpec {
            interpreter: descriptor.execution.interpreter.clone(),
            script_path: script_path.clone(),
            args: build_args(descriptor, arguments),
            env: policy.build_env(std::env::vars()),
            working_dir: policy.working_dir(self.registry.scripts_dir()),
            limits: ProcessLimits::new(memory_limit, timeout, &self.limits),
            timeout,
            display_name: descriptor.display_name().to_string(),
        };

        info!(
            script_id = %descriptor.id,
            attempt,
            sandbox = %descriptor.security.sandbox,
            filesystem = %policy.filesystem(),
            network = %policy.network(),
            timeout_ms = descriptor.timeout_ms(),
            memory_limit = %descriptor.security.max_memory,
            "Executing script"
        );

        let run = self.supervisor.run(&spec, progress.as_ref()).await;
        let mut result = self.finish(descriptor, &script_path, run, started_at, memory_limit);
        result.attempt = attempt;

        match &result.error_details {
            None => info!(
                script_id = %descriptor.id,
                attempt,
                execution_time_ms = result.execution_time_ms,
                outputs = result.outputs.len(),
                "Script completed"
            ),
            Some(details) => warn!(
                script_id = %descriptor.id,
                attempt,
                category = %details.category,
                exit_code = result.exit_code,
                "Script failed: {}",
                details.message
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JsonRegistry;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        service: StandardExecutionService,
        registry: Arc<JsonRegistry>,
    }

    fn fixture(scripts: &[(&str, &str)], descriptors: JsonValue) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in scripts {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let descriptors: Vec<ScriptDescriptor> = serde_json::from_value(descriptors).unwrap();
        let registry =
            Arc::new(JsonRegistry::from_descriptors(dir.path().to_path_buf(), descriptors).unwrap());

        let config = Config::new(PathBuf::from("registry.json"), dir.path().join("jobs"))
            .with_limits(ResourceLimits {
                max_processes: 4096,
                ..ResourceLimits::default()
            });
        let service = StandardExecutionService::new(registry.clone(), &config);
        Fixture {
            _dir: dir,
            service,
            registry,
        }
    }

    fn args(value: JsonValue) -> HashMap<String, JsonValue> {
        serde_json::from_value(value).unwrap()
    }

    async fn run(fixture: &Fixture, id: &str, arguments: JsonValue) -> ExecutionResult {
        let descriptor = fixture.registry.get_script(id).unwrap();
        fixture
            .service
            .execute(&descriptor, &args(arguments), 0, None)
            .await
    }

    #[tokio::test]
    async fn test_echo_completes() {
        let fixture = fixture(
            &[("echo.sh", r#"echo "$1""#)],
            json!([{
                "id": "echo",
                "path": "echo.sh",
                "execution": {
                    "interpreter": "/bin/sh",
                    "args": [{ "name": "msg", "type": "string", "required": true }]
                }
            }]),
        );

        let result = run(&fixture, "echo", json!({ "msg": "hi" })).await;
        assert!(result.success, "{:?}", result.error_details);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hi\n");
        assert!(result.outputs.is_empty());
        assert!(result.resource_usage.is_some());
    }

    #[tokio::test]
    async fn test_outputs_are_parsed() {
        let fixture = fixture(
            &[("count.sh", "echo count=3\necho done=yes")],
            json!([{
                "id": "count",
                "path": "count.sh",
                "execution": { "interpreter": "/bin/sh" },
                "outputs": [{ "name": "count", "type": "number" }, { "name": "done", "type": "boolean" }]
            }]),
        );

        let result = run(&fixture, "count", json!({})).await;
        assert!(result.success);
        assert_eq!(result.outputs["count"], json!(3));
        assert_eq!(result.outputs["done"], json!(true));
    }

    #[tokio::test]
    async fn test_missing_argument_never_spawns() {
        let fixture = fixture(
            &[("touch.sh", "touch spawned")],
            json!([{
                "id": "touch",
                "path": "touch.sh",
                "execution": {
                    "interpreter": "/bin/sh",
                    "args": [{ "name": "target", "type": "string", "required": true }]
                }
            }]),
        );

        let result = run(&fixture, "touch", json!({})).await;
        let details = result.error_details.unwrap();
        assert_eq!(details.category, ErrorCategory::Validation);
        assert_eq!(details.message, "Missing required argument: target");
        assert_eq!(result.exit_code, PRE_EXECUTION_EXIT_CODE);
        assert!(!fixture.registry.scripts_dir().join("spawned").exists());
    }

    #[tokio::test]
    async fn test_missing_script_is_dependency() {
        let fixture = fixture(&[], json!([{ "id": "ghost", "path": "ghost.sh" }]));

        let result = run(&fixture, "ghost", json!({})).await;
        let details = result.error_details.unwrap();
        assert_eq!(details.category, ErrorCategory::Dependency);
        assert!(details.message.starts_with("Script file not found"));
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn test_non_executable_is_permission() {
        let fixture = fixture(&[], json!([{ "id": "plain", "path": "plain.sh" }]));
        std::fs::write(fixture.registry.scripts_dir().join("plain.sh"), "true").unwrap();

        let result = run(&fixture, "plain", json!({})).await;
        assert_eq!(
            result.error_details.unwrap().category,
            ErrorCategory::Permission
        );
    }

    #[tokio::test]
    async fn test_invalid_memory_limit_is_validation() {
        let fixture = fixture(
            &[("ok.sh", "true")],
            json!([{ "id": "ok", "path": "ok.sh", "security": { "max_memory": "plenty" } }]),
        );

        let result = run(&fixture, "ok", json!({})).await;
        let details = result.error_details.unwrap();
        assert_eq!(details.category, ErrorCategory::Validation);
        assert_eq!(details.context["memory_limit"], "plenty");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution() {
        let fixture = fixture(
            &[("fail.sh", "echo partial=1\nexit 2")],
            json!([{
                "id": "fail",
                "path": "fail.sh",
                "execution": { "interpreter": "/bin/sh" },
                "outputs": [{ "name": "partial", "type": "number" }]
            }]),
        );

        let result = run(&fixture, "fail", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.outputs["partial"], json!(1));
        let details = result.error_details.unwrap();
        assert_eq!(details.category, ErrorCategory::Execution);
        assert_eq!(details.context["exit_code"], 2);
    }

    #[tokio::test]
    async fn test_timeout() {
        let fixture = fixture(
            &[("slow.sh", "sleep 5")],
            json!([{
                "id": "slow",
                "path": "slow.sh",
                "execution": { "interpreter": "/bin/sh", "timeout": 300 }
            }]),
        );

        let result = run(&fixture, "slow", json!({})).await;
        let details = result.error_details.unwrap();
        assert_eq!(details.category, ErrorCategory::Timeout);
        assert_eq!(details.context["timeout_ms"], 300);
        assert_eq!(result.exit_code, -1);
        assert!(result.execution_time_ms < 3000);
    }

    #[tokio::test]
    async fn test_memory_ceiling() {
        let fixture = fixture(
            &[(
                "hog.sh",
                "x=$(head -c 134217728 /dev/zero | tr '\\0' a)\necho ${#x}",
            )],
            json!([{
                "id": "hog",
                "path": "hog.sh",
                "execution": { "interpreter": "/bin/sh", "timeout": 20000 },
                "security": { "max_memory": "64MB" }
            }]),
        );

        let result = run(&fixture, "hog", json!({})).await;
        assert!(!result.success);
        let category = result.error_details.unwrap().category;
        assert!(
            matches!(category, ErrorCategory::Resource | ErrorCategory::Execution),
            "unexpected category {:?}",
            category
        );
    }

    #[tokio::test]
    async fn test_sandbox_environment_reaches_script() {
        let fixture = fixture(
            &[("env.sh", "echo \"home=$HOME\"\necho \"editor=${EDITOR:-unset}\"")],
            json!([{
                "id": "env",
                "path": "env.sh",
                "execution": { "interpreter": "/bin/sh" },
                "security": { "sandbox": "strict" },
                "outputs": [{ "name": "home", "type": "string" }, { "name": "editor", "type": "string" }]
            }]),
        );

        let result = run(&fixture, "env", json!({})).await;
        assert!(result.success, "{:?}", result.error_details);
        assert_eq!(
            result.outputs["home"],
            json!(std::env::temp_dir().to_string_lossy())
        );
        assert_eq!(result.outputs["editor"], json!("unset"));
    }
}
