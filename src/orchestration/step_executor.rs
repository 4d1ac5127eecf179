//! Step executor: failover, retries, and backoff for one workflow step.
//!
//! A step names a capability, an ordered list of provider candidates, and a
//! retry budget. One *pass* walks the candidates left to right, leasing a
//! credential and calling the adapter for each until one succeeds. Failing
//! over to the next candidate never consumes a retry; a retry is charged
//! only when a whole pass ends without a success, and each retry waits out
//! an exponential, jittered backoff first.

use super::ControlSignal;
use crate::adapter::{AdapterError, AdapterRegistry};
use crate::config::ExecutionConfig;
use crate::credentials::{CredentialError, CredentialRegistry, LeaseOutcome};
use crate::models::workflow::WorkflowStep;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Terminal result of executing one step.
#[derive(Debug)]
pub enum StepOutcome {
    Succeeded(Value),
    /// Retry and failover budgets are exhausted, or the failure was not
    /// retryable.
    Failed { error: String },
    /// The workflow was cancelled; any in-flight result was discarded.
    Cancelled,
}

/// Outcome plus the retries the step consumed getting there.
#[derive(Debug)]
pub struct StepRun {
    pub outcome: StepOutcome,
    pub retries: u32,
}

pub struct StepExecutor {
    registry: Arc<CredentialRegistry>,
    adapters: Arc<AdapterRegistry>,
    config: ExecutionConfig,
}

/// Exponential backoff with jitter: `base * multiplier^(attempt-1)`, scaled
/// by a random factor in [0.5, 1.0) when jitter is on, capped at the
/// configured maximum.
pub fn calculate_retry_delay(config: &ExecutionConfig, attempt: u32) -> Duration {
    let base = config.retry_base_delay().as_millis() as f64;
    let exponent = attempt.saturating_sub(1).min(16) as i32;
    let mut delay = base * config.backoff_multiplier.powi(exponent);
    if config.jitter {
        delay *= 0.5 + fastrand::f64() * 0.5;
    }
    Duration::from_millis(delay as u64).min(config.retry_max_delay())
}

impl StepExecutor {
    pub fn new(
        registry: Arc<CredentialRegistry>,
        adapters: Arc<AdapterRegistry>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            registry,
            adapters,
            config,
        }
    }

    /// Drive one step to a terminal outcome, respecting the cancellation
    /// signal between attempts and while a call is in flight.
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        control: &mut watch::Receiver<ControlSignal>,
    ) -> StepRun {
        let mut retries = 0u32;
        let mut last_error = "no eligible provider for step".to_string();

        loop {
            if is_cancelled(control) {
                return StepRun {
                    outcome: StepOutcome::Cancelled,
                    retries,
                };
            }

            match self.run_pass(step, control, &mut last_error).await {
                PassResult::Succeeded(value) => {
                    return StepRun {
                        outcome: StepOutcome::Succeeded(value),
                        retries,
                    }
                }
                PassResult::Fatal(error) => {
                    return StepRun {
                        outcome: StepOutcome::Failed { error },
                        retries,
                    }
                }
                PassResult::Cancelled => {
                    return StepRun {
                        outcome: StepOutcome::Cancelled,
                        retries,
                    }
                }
                PassResult::Exhausted => {}
            }

            if retries >= step.max_retries {
                warn!(
                    step_index = step.index,
                    retries,
                    last_error = %last_error,
                    "step retry budget exhausted"
                );
                return StepRun {
                    outcome: StepOutcome::Failed {
                        error: last_error.clone(),
                    },
                    retries,
                };
            }

            retries += 1;
            let delay = calculate_retry_delay(&self.config, retries);
            debug!(
                step_index = step.index,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                "backing off before retry"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_cancel(control) => {
                    return StepRun { outcome: StepOutcome::Cancelled, retries };
                }
            }
        }
    }

    /// One pass over the candidate providers.
    async fn run_pass(
        &self,
        step: &WorkflowStep,
        control: &mut watch::Receiver<ControlSignal>,
        last_error: &mut String,
    ) -> PassResult {
        for provider in &step.provider_candidates {
            // A rejected credential is invalidated on release, so looping on
            // the same provider re-selects from the remaining pool. The pool
            // is finite; each auth failure removes one candidate.
            loop {
                if is_cancelled(control) {
                    return PassResult::Cancelled;
                }

                let lease = match self.registry.acquire(provider, step.capability, 1) {
                    Ok(lease) => lease,
                    Err(err) => {
                        debug!(
                            step_index = step.index,
                            provider = %provider,
                            error = %err,
                            "candidate unavailable; failing over"
                        );
                        *last_error = err.to_string();
                        break;
                    }
                };

                let Some(adapter) = self.adapters.get(provider) else {
                    self.registry.release(lease, LeaseOutcome::Cancelled);
                    *last_error = format!("no adapter registered for provider {provider}");
                    break;
                };
                let secret = match self.registry.secret(lease.credential_id) {
                    Ok(secret) => secret,
                    Err(err) => {
                        self.registry.release(lease, LeaseOutcome::Cancelled);
                        *last_error = err.to_string();
                        break;
                    }
                };

                let timeout = self
                    .registry
                    .provider(provider)
                    .map(|p| p.call_timeout())
                    .unwrap_or_else(|| self.config.step_timeout());

                let result = tokio::select! {
                    called = tokio::time::timeout(
                        timeout,
                        adapter.call(step.capability, &step.payload, &secret),
                    ) => match called {
                        Ok(result) => result,
                        Err(_) => Err(AdapterError::Timeout),
                    },
                    _ = wait_for_cancel(control) => {
                        self.registry.release(lease, LeaseOutcome::Cancelled);
                        return PassResult::Cancelled;
                    }
                };

                // A cancel that lands as the call returns discards the
                // result without charging quota or health.
                if is_cancelled(control) {
                    self.registry.release(lease, LeaseOutcome::Cancelled);
                    return PassResult::Cancelled;
                }

                match result {
                    Ok(value) => {
                        self.registry.release(lease, LeaseOutcome::Success);
                        return PassResult::Succeeded(value);
                    }
                    Err(err) => {
                        let outcome = err.lease_outcome();
                        self.registry.release(lease, outcome);
                        *last_error = err.to_string();
                        match err {
                            AdapterError::Malformed(_) => {
                                return PassResult::Fatal(last_error.clone());
                            }
                            // The failed credential is now invalid; try the
                            // same provider's remaining credentials.
                            AdapterError::AuthError(_) => continue,
                            AdapterError::RateLimited { .. }
                            | AdapterError::NetworkError(_)
                            | AdapterError::Timeout => break,
                        }
                    }
                }
            }
        }
        PassResult::Exhausted
    }
}

enum PassResult {
    Succeeded(Value),
    Fatal(String),
    Cancelled,
    /// Every candidate failed transiently; the caller decides whether a
    /// retry remains.
    Exhausted,
}

fn is_cancelled(control: &watch::Receiver<ControlSignal>) -> bool {
    *control.borrow() == ControlSignal::Cancel
}

/// Resolve once the control signal reads Cancel. A closed channel counts as
/// a cancel: the scheduler that owned the sender is gone.
async fn wait_for_cancel(control: &mut watch::Receiver<ControlSignal>) {
    loop {
        if *control.borrow() == ControlSignal::Cancel {
            return;
        }
        if control.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FakeAdapter;
    use crate::config::RateLimiterConfig;
    use crate::models::credential::{Credential, QuotaConfig, SecretHandle};
    use crate::models::provider::{Capability, Provider, ProviderId};
    use crate::models::workflow::StepSpec;
    use crate::models::workflow::WorkflowSpec;
    use serde_json::json;

    fn harness() -> (Arc<CredentialRegistry>, Arc<AdapterRegistry>, StepExecutor) {
        let registry = Arc::new(CredentialRegistry::new(&RateLimiterConfig::default()));
        let adapters = Arc::new(AdapterRegistry::new());
        let executor = StepExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&adapters),
            ExecutionConfig::default(),
        );
        (registry, adapters, executor)
    }

    fn add_credential(registry: &CredentialRegistry, provider: &str, secret: &str) {
        registry
            .register_credential(Credential::new(
                ProviderId::new(provider),
                SecretHandle::new(secret),
                QuotaConfig::per_minute(100),
            ))
            .unwrap();
    }

    fn step(capability: Capability, providers: &[&str], max_retries: u32) -> WorkflowStep {
        let spec = WorkflowSpec::new(
            "test",
            vec![StepSpec::new(
                capability,
                providers.iter().map(|p| ProviderId::new(*p)).collect(),
            )
            .with_max_retries(max_retries)
            .with_payload(json!({"q": "test"}))],
        );
        crate::models::workflow::Workflow::from_spec(spec, max_retries)
            .steps
            .remove(0)
    }

    fn control() -> (watch::Sender<ControlSignal>, watch::Receiver<ControlSignal>) {
        watch::channel(ControlSignal::Run)
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::serpapi());
        add_credential(&registry, "serpapi", "key-1");
        adapters.register(
            ProviderId::new("serpapi"),
            Arc::new(FakeAdapter::succeeding(json!({"hits": 3}))),
        );

        let (_tx, mut rx) = control();
        let run = executor
            .execute(&step(Capability::Search, &["serpapi"], 3), &mut rx)
            .await;
        assert!(matches!(run.outcome, StepOutcome::Succeeded(ref v) if v == &json!({"hits": 3})));
        assert_eq!(run.retries, 0);
    }

    #[tokio::test]
    async fn failover_consumes_no_retry() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::firecrawl());
        registry.register_provider(Provider::jina());
        add_credential(&registry, "firecrawl", "fc-key");
        add_credential(&registry, "jina", "jina-key");

        let firecrawl = Arc::new(FakeAdapter::failing(AdapterError::NetworkError(
            "connection reset".into(),
        )));
        let jina = Arc::new(FakeAdapter::succeeding(json!({"content": "page"})));
        adapters.register(ProviderId::new("firecrawl"), firecrawl.clone());
        adapters.register(ProviderId::new("jina"), jina.clone());

        let (_tx, mut rx) = control();
        let run = executor
            .execute(&step(Capability::Scrape, &["firecrawl", "jina"], 3), &mut rx)
            .await;
        assert!(matches!(run.outcome, StepOutcome::Succeeded(_)));
        assert_eq!(run.retries, 0);
        assert_eq!(firecrawl.call_count(), 1);
        assert_eq!(jina.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_charged_only_after_full_pass_fails() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::serpapi());
        add_credential(&registry, "serpapi", "key-1");
        let adapter = Arc::new(FakeAdapter::flaky(
            2,
            AdapterError::NetworkError("reset".into()),
        ));
        adapters.register(ProviderId::new("serpapi"), adapter.clone());

        let (_tx, mut rx) = control();
        let run = executor
            .execute(&step(Capability::Search, &["serpapi"], 3), &mut rx)
            .await;
        assert!(matches!(run.outcome, StepOutcome::Succeeded(_)));
        assert_eq!(run.retries, 2);
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_fails_step() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::serpapi());
        add_credential(&registry, "serpapi", "key-1");
        let adapter = Arc::new(FakeAdapter::failing(AdapterError::NetworkError(
            "reset".into(),
        )));
        adapters.register(ProviderId::new("serpapi"), adapter.clone());

        let (_tx, mut rx) = control();
        let run = executor
            .execute(&step(Capability::Search, &["serpapi"], 3), &mut rx)
            .await;
        // Initial pass plus three retries.
        assert_eq!(adapter.call_count(), 4);
        assert_eq!(run.retries, 3);
        match run.outcome {
            StepOutcome::Failed { error } => assert!(error.contains("network error")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_response_fails_without_retry() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::serpapi());
        add_credential(&registry, "serpapi", "key-1");
        let adapter = Arc::new(FakeAdapter::failing(AdapterError::Malformed(
            "not json".into(),
        )));
        adapters.register(ProviderId::new("serpapi"), adapter.clone());

        let (_tx, mut rx) = control();
        let run = executor
            .execute(&step(Capability::Search, &["serpapi"], 3), &mut rx)
            .await;
        assert!(matches!(run.outcome, StepOutcome::Failed { .. }));
        assert_eq!(run.retries, 0);
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn auth_failure_rotates_to_next_credential_of_same_provider() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::serpapi());
        add_credential(&registry, "serpapi", "revoked-key");
        add_credential(&registry, "serpapi", "good-key");
        let adapter = Arc::new(FakeAdapter::scripted([
            Err(AdapterError::AuthError("invalid key".into())),
            Ok(json!({"hits": 1})),
        ]));
        adapters.register(ProviderId::new("serpapi"), adapter.clone());

        let (_tx, mut rx) = control();
        let run = executor
            .execute(&step(Capability::Search, &["serpapi"], 0), &mut rx)
            .await;
        assert!(matches!(run.outcome, StepOutcome::Succeeded(_)));
        assert_eq!(run.retries, 0);
        assert_eq!(adapter.call_count(), 2);
        // One of the two credentials is now invalid.
        let invalid = registry
            .all_health_snapshots()
            .into_iter()
            .filter(|s| s.status == crate::models::credential::CredentialStatus::Invalid)
            .count();
        assert_eq!(invalid, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_is_enforced() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::serpapi());
        add_credential(&registry, "serpapi", "key-1");
        let adapter = Arc::new(
            FakeAdapter::succeeding(json!({"hits": 9}))
                .with_delay(Duration::from_secs(120)),
        );
        adapters.register(ProviderId::new("serpapi"), adapter.clone());

        let (_tx, mut rx) = control();
        let run = executor
            .execute(&step(Capability::Search, &["serpapi"], 0), &mut rx)
            .await;
        match run.outcome {
            StepOutcome::Failed { error } => assert!(error.contains("timed out")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_discards_in_flight_call() {
        let (registry, adapters, executor) = harness();
        registry.register_provider(Provider::serpapi());
        let id = registry
            .register_credential(Credential::new(
                ProviderId::new("serpapi"),
                SecretHandle::new("key-1"),
                QuotaConfig::per_minute(100),
            ))
            .unwrap();
        let adapter = Arc::new(
            FakeAdapter::succeeding(json!({"hits": 9})).with_delay(Duration::from_secs(5)),
        );
        adapters.register(ProviderId::new("serpapi"), adapter.clone());

        let (tx, mut rx) = control();
        let task = tokio::spawn(async move {
            let step = step(Capability::Search, &["serpapi"], 3);
            executor.execute(&step, &mut rx).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(ControlSignal::Cancel).unwrap();

        let run = task.await.unwrap();
        assert!(matches!(run.outcome, StepOutcome::Cancelled));
        // The discarded call consumed neither quota nor health.
        let snapshot = registry.health_snapshot(id).unwrap();
        assert_eq!(snapshot.windows[0].used, 0);
        assert_eq!(snapshot.windows[0].in_flight, 0);
        assert_eq!(snapshot.error_rate, None);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = ExecutionConfig {
            jitter: false,
            ..ExecutionConfig::default()
        };
        assert_eq!(calculate_retry_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_retry_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_retry_delay(&config, 3), Duration::from_secs(4));
        // Capped at retry_max_delay.
        assert_eq!(calculate_retry_delay(&config, 10), Duration::from_secs(30));
    }

    #[test]
    fn jittered_backoff_stays_in_range() {
        let config = ExecutionConfig::default();
        for attempt in 1..=5 {
            let nominal = calculate_retry_delay(
                &ExecutionConfig {
                    jitter: false,
                    ..config.clone()
                },
                attempt,
            );
            let jittered = calculate_retry_delay(&config, attempt);
            assert!(jittered <= nominal);
            assert!(jittered >= nominal / 2);
        }
    }
}
