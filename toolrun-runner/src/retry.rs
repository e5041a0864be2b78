//! Retry coordination
//!
//! Decides whether a failed attempt is worth repeating, computes the
//! exponential backoff, annotates results with their [`RetryInfo`] and keeps
//! per-script execution statistics.

use rand::Rng;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use toolrun_core::domain::error::RetryInfo;
use toolrun_core::domain::execution::ExecutionResult;
use toolrun_core::domain::script::ScriptDescriptor;
use toolrun_core::dto::stats::ScriptStats;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::ProgressSink;
use crate::service::ExecutionService;

/// Exponential backoff with proportional jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Fraction of the delay added or removed at random
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            ..Self::default()
        }
    }

    /// `base * 2^attempt`, before jitter
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay to wait before retrying after failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        nominal.mul_f64(factor)
    }
}

/// Outcome of inspecting one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Succeeded,
    Retry { delay: Duration },
    NotRetryable,
    Exhausted,
}

/// Runs attempts through an [`ExecutionService`] and decides on retries
pub struct RetryCoordinator {
    service: Arc<dyn ExecutionService>,
    policy: RetryPolicy,
    stats: Mutex<HashMap<String, ScriptStats>>,
}

impl RetryCoordinator {
    pub fn new(service: Arc<dyn ExecutionService>, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a single attempt and records it in the statistics
    pub async fn execute_once(
        &self,
        descriptor: &ScriptDescriptor,
        arguments: &HashMap<String, JsonValue>,
        attempt: u32,
        progress: Option<ProgressSink>,
    ) -> ExecutionResult {
        let result = self
            .service
            .execute(descriptor, arguments, attempt, progress)
            .await;
        self.record(&descriptor.id, &result);
        result
    }

    /// Inspects a finished attempt and fills in its retry info
    ///
    /// `attempts_made` counts the retries already spent on the job, so the
    /// first attempt is decided with 0.
    pub fn decide(&self, result: &mut ExecutionResult, attempts_made: u32) -> RetryDecision {
        self.decide_with(result, attempts_made, self.policy.max_retries)
    }

    /// Same as [`decide`](Self::decide) with a per-job retry budget
    pub fn decide_with(
        &self,
        result: &mut ExecutionResult,
        attempts_made: u32,
        max_attempts: u32,
    ) -> RetryDecision {
        let Some(details) = result.error_details.as_mut() else {
            return RetryDecision::Succeeded;
        };

        let is_retryable = details.category.is_retryable();
        let (decision, reason) = if !is_retryable {
            (
                RetryDecision::NotRetryable,
                details.category.retry_reason().to_string(),
            )
        } else if attempts_made >= max_attempts {
            (
                RetryDecision::Exhausted,
                format!("Maximum retry attempts ({}) reached", max_attempts),
            )
        } else {
            (
                RetryDecision::Retry {
                    delay: self.policy.delay_for(attempts_made),
                },
                details.category.retry_reason().to_string(),
            )
        };

        let next_delay_ms = match decision {
            RetryDecision::Retry { delay } => Some(delay.as_millis() as u64),
            _ => None,
        };
        details.retry_info = Some(RetryInfo {
            is_retryable,
            attempts_made,
            max_attempts,
            next_delay_ms,
            reason,
        });
        decision
    }

    /// Runs attempts until success, a non-retryable failure or exhaustion
    ///
    /// Returns the last result together with the number of retries made.
    pub async fn execute_with_retry(
        &self,
        descriptor: &ScriptDescriptor,
        arguments: &HashMap<String, JsonValue>,
        progress: Option<ProgressSink>,
    ) -> (ExecutionResult, u32) {
        let mut retries = 0;
        loop {
            let mut result = self
                .execute_once(descriptor, arguments, retries, progress.clone())
                .await;

            match self.decide(&mut result, retries) {
                RetryDecision::Retry { delay } => {
                    info!(
                        script_id = %descriptor.id,
                        attempt = retries + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        category = ?result.error_details.as_ref().map(|d| d.category),
                        "Retrying script"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                decision => {
                    if decision != RetryDecision::Succeeded {
                        debug!(
                            "Not retrying {} after {} retries: {:?}",
                            descriptor.id, retries, decision
                        );
                    }
                    return (result, retries);
                }
            }
        }
    }

    fn record(&self, script_id: &str, result: &ExecutionResult) {
        let mut stats = self.stats.lock().unwrap();
        stats
            .entry(script_id.to_string())
            .or_default()
            .record(result.success, result.execution_time_ms);
    }

    /// Execution statistics, for one script or all of them
    pub fn stats(&self, script_id: Option<&str>) -> HashMap<String, ScriptStats> {
        let stats = self.stats.lock().unwrap();
        match script_id {
            Some(id) => stats
                .get(id)
                .map(|s| HashMap::from([(id.to_string(), s.clone())]))
                .unwrap_or_default(),
            None => stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use toolrun_core::domain::error::{ErrorCategory, ErrorDetails};

    /// Replays a fixed sequence of outcomes
    struct ScriptedService {
        outcomes: Mutex<VecDeque<Option<ErrorCategory>>>,
        calls: Mutex<Vec<u32>>,
    }

    impl ScriptedService {
        fn new(outcomes: Vec<Option<ErrorCategory>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExecutionService for ScriptedService {
        async fn execute(
            &self,
            _descriptor: &ScriptDescriptor,
            _arguments: &HashMap<String, JsonValue>,
            attempt: u32,
            _progress: Option<ProgressSink>,
        ) -> ExecutionResult {
            self.calls.lock().unwrap().push(attempt);
            let outcome = self.outcomes.lock().unwrap().pop_front().flatten();
            match outcome {
                Some(category) => {
                    ExecutionResult::rejected(ErrorDetails::new(category, "failed"), Utc::now())
                }
                None => {
                    let mut result = ExecutionResult::rejected(
                        ErrorDetails::new(ErrorCategory::Unknown, ""),
                        Utc::now(),
                    );
                    result.success = true;
                    result.exit_code = 0;
                    result.error_details = None;
                    result
                }
            }
        }
    }

    fn descriptor() -> ScriptDescriptor {
        serde_json::from_value(serde_json::json!({ "id": "job", "path": "job.sh" })).unwrap()
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            jitter: 0.1,
        }
    }

    #[test]
    fn test_nominal_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_jittered_delay_stays_within_bounds_and_grows() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delays: Vec<Duration> = (0..4).map(|a| policy.delay_for(a)).collect();
            for (attempt, delay) in delays.iter().enumerate() {
                let nominal = policy.nominal_delay(attempt as u32).as_secs_f64();
                let secs = delay.as_secs_f64();
                assert!(secs >= nominal * 0.9 - 1e-9 && secs <= nominal * 1.1 + 1e-9);
            }
            assert!(delays.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried_until_exhausted() {
        let service = ScriptedService::new(vec![Some(ErrorCategory::Timeout); 5]);
        let coordinator = RetryCoordinator::new(service.clone(), fast_policy(3));

        let (result, retries) = coordinator
            .execute_with_retry(&descriptor(), &HashMap::new(), None)
            .await;

        assert_eq!(retries, 3);
        assert_eq!(*service.calls.lock().unwrap(), vec![0, 1, 2, 3]);
        let info = result.error_details.unwrap().retry_info.unwrap();
        assert!(info.is_retryable);
        assert_eq!(info.attempts_made, 3);
        assert_eq!(info.max_attempts, 3);
        assert_eq!(info.next_delay_ms, None);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_stops_immediately() {
        let service = ScriptedService::new(vec![Some(ErrorCategory::Dependency)]);
        let coordinator = RetryCoordinator::new(service.clone(), fast_policy(3));

        let (result, retries) = coordinator
            .execute_with_retry(&descriptor(), &HashMap::new(), None)
            .await;

        assert_eq!(retries, 0);
        assert_eq!(service.calls.lock().unwrap().len(), 1);
        let info = result.error_details.unwrap().retry_info.unwrap();
        assert!(!info.is_retryable);
        assert_eq!(info.reason, "Missing dependencies must be installed");
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let service = ScriptedService::new(vec![Some(ErrorCategory::Resource), None]);
        let coordinator = RetryCoordinator::new(service, fast_policy(3));

        let (result, retries) = coordinator
            .execute_with_retry(&descriptor(), &HashMap::new(), None)
            .await;

        assert!(result.success);
        assert_eq!(retries, 1);

        let stats = coordinator.stats(Some("job"));
        assert_eq!(stats["job"].total_executions, 2);
        assert_eq!(stats["job"].total_failures, 1);
        assert!(coordinator.stats(Some("other")).is_empty());
    }

    #[test]
    fn test_decide_fills_next_delay() {
        let service = ScriptedService::new(vec![]);
        let coordinator = RetryCoordinator::new(service, RetryPolicy::default());
        let mut result =
            ExecutionResult::rejected(ErrorDetails::new(ErrorCategory::Timeout, "slow"), Utc::now());

        let decision = coordinator.decide(&mut result, 1);
        let RetryDecision::Retry { delay } = decision else {
            panic!("expected a retry, got {:?}", decision);
        };
        let info = result.error_details.unwrap().retry_info.unwrap();
        assert_eq!(info.next_delay_ms, Some(delay.as_millis() as u64));
        assert!(delay >= Duration::from_millis(1800) && delay <= Duration::from_millis(2200));
        assert_eq!(info.reason, "Temporary performance issue or system load");
    }

    #[test]
    fn test_decide_with_job_budget() {
        let service = ScriptedService::new(vec![]);
        let coordinator = RetryCoordinator::new(service, fast_policy(3));
        let mut result =
            ExecutionResult::rejected(ErrorDetails::new(ErrorCategory::Timeout, "slow"), Utc::now());

        assert_eq!(
            coordinator.decide_with(&mut result, 1, 1),
            RetryDecision::Exhausted
        );
        let info = result.error_details.unwrap().retry_info.unwrap();
        assert_eq!(info.max_attempts, 1);
        assert_eq!(info.reason, "Maximum retry attempts (1) reached");
    }
}
