//! Shared helpers for integration tests.

#![allow(dead_code)]

use research_core::adapter::FakeAdapter;
use research_core::config::CoreConfig;
use research_core::{
    Capability, ProviderId, QuotaConfig, ResearchCore, SecretHandle, StepSpec, WorkflowId,
    WorkflowSpec, WorkflowState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Core with a serpapi credential and an instant fake adapter.
pub async fn core_with_search(quota: QuotaConfig) -> ResearchCore {
    let core = ResearchCore::new(CoreConfig::default()).expect("core");
    core.register_credential(
        ProviderId::new("serpapi"),
        SecretHandle::new("test-key"),
        quota,
    )
    .await
    .expect("credential");
    core.register_adapter(
        ProviderId::new("serpapi"),
        Arc::new(FakeAdapter::succeeding(json!({"hits": 1}))),
    );
    core
}

/// Spec of `n` identical search steps against serpapi.
pub fn search_steps(n: usize) -> WorkflowSpec {
    WorkflowSpec::new(
        "bulk_search",
        (0..n)
            .map(|_| {
                StepSpec::new(Capability::Search, vec![ProviderId::new("serpapi")])
                    .with_payload(json!({"q": "test"}))
            })
            .collect(),
    )
}

pub async fn wait_for_terminal(
    core: &ResearchCore,
    id: WorkflowId,
    timeout: Duration,
) -> WorkflowState {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = core.get_status(id).expect("workflow exists").status;
        if status.is_terminal() {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workflow {id} still {status} after {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(
    core: &ResearchCore,
    id: WorkflowId,
    wanted: WorkflowState,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = core.get_status(id).expect("workflow exists").status;
        if status == wanted {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workflow {id} reached {status}, wanted {wanted}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
