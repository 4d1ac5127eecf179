//! Exposed orchestration interface.
//!
//! [`ResearchCore`] wires the credential registry, adapter table,
//! methodology catalog, scheduler, and record store together behind one
//! handle. Everything here returns quickly: submission queues, cancellation
//! signals, and status reads never wait on provider calls.

use super::scheduler::{QueueStatistics, Scheduler};
use super::step_executor::StepExecutor;
use crate::adapter::{AdapterRegistry, ServiceAdapter};
use crate::config::CoreConfig;
use crate::credentials::{Alert, CredentialRegistry, LeaseOutcome};
use crate::error::Result;
use crate::methodology::{Methodology, MethodologyRegistry};
use crate::models::credential::{
    Credential, CredentialId, HealthSnapshot, QuotaConfig, SecretHandle,
};
use crate::models::provider::{Provider, ProviderId};
use crate::models::workflow::{
    Workflow, WorkflowId, WorkflowSpec, WorkflowStatusView,
};
use crate::state_machine::WorkflowState;
use crate::storage::{InMemoryStore, RecordStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Counts of what a [`ResearchCore::recover`] call restored.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoverySummary {
    pub credentials: usize,
    pub requeued_workflows: usize,
    pub restored_workflows: usize,
}

/// The orchestration core. Cheap handle over shared state; build once and
/// share. Must be constructed inside a tokio runtime: the scheduler spawns
/// its admission loop on creation.
pub struct ResearchCore {
    config: CoreConfig,
    registry: Arc<CredentialRegistry>,
    adapters: Arc<AdapterRegistry>,
    methodologies: MethodologyRegistry,
    scheduler: Scheduler,
    store: Arc<dyn RecordStore>,
}

impl ResearchCore {
    /// Core with the default in-memory store.
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(config: CoreConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(CredentialRegistry::new(&config.rate_limiter));
        for provider in Provider::builtin_catalog() {
            registry.register_provider(provider);
        }
        let adapters = Arc::new(AdapterRegistry::new());
        let executor = StepExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&adapters),
            config.execution.clone(),
        );
        let scheduler = Scheduler::start(
            &config.scheduler,
            executor,
            Arc::clone(&registry),
            Arc::clone(&store),
        );
        info!("research core initialized");
        Ok(Self {
            config,
            registry,
            adapters,
            methodologies: MethodologyRegistry::with_builtins(),
            scheduler,
            store,
        })
    }

    // ---- workflow lifecycle ----

    /// Instantiate a methodology and queue the resulting workflow.
    pub async fn create_workflow(
        &self,
        methodology: &str,
        parameters: Value,
        priority: i32,
    ) -> Result<WorkflowId> {
        let spec = self.methodologies.resolve(methodology, parameters, priority)?;
        self.scheduler
            .submit(spec, self.config.execution.default_max_retries)
            .await
    }

    /// Queue a caller-assembled workflow spec directly.
    pub async fn submit_workflow(&self, spec: WorkflowSpec) -> Result<WorkflowId> {
        MethodologyRegistry::validate_spec(&spec)?;
        self.scheduler
            .submit(spec, self.config.execution.default_max_retries)
            .await
    }

    pub fn get_status(&self, id: WorkflowId) -> Result<WorkflowStatusView> {
        self.scheduler.status(id)
    }

    pub fn get_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        self.scheduler.workflow(id)
    }

    /// Aggregated step results; `None` until the workflow completes.
    pub fn get_results(&self, id: WorkflowId) -> Result<Option<Value>> {
        Ok(self.scheduler.workflow(id)?.results())
    }

    /// Results of every step that succeeded so far, kept even after a later
    /// step fails the workflow.
    pub fn get_partial_results(&self, id: WorkflowId) -> Result<Vec<(usize, Value)>> {
        Ok(self.scheduler.workflow(id)?.partial_results())
    }

    pub async fn cancel_workflow(&self, id: WorkflowId) -> Result<()> {
        self.scheduler.cancel(id).await
    }

    pub fn pause_workflow(&self, id: WorkflowId) -> Result<()> {
        self.scheduler.pause(id)
    }

    pub async fn resume_workflow(&self, id: WorkflowId) -> Result<()> {
        self.scheduler.resume(id).await
    }

    pub fn queue_statistics(&self) -> QueueStatistics {
        self.scheduler.statistics()
    }

    // ---- providers, adapters, methodologies ----

    pub fn register_provider(&self, provider: Provider) {
        self.registry.register_provider(provider);
    }

    pub fn register_adapter(&self, provider: ProviderId, adapter: Arc<dyn ServiceAdapter>) {
        self.adapters.register(provider, adapter);
    }

    pub fn register_methodology(&self, methodology: Methodology) -> Result<()> {
        self.methodologies.register(methodology)
    }

    pub fn methodology_names(&self) -> Vec<String> {
        self.methodologies.names()
    }

    // ---- credentials ----

    /// Register a credential and persist it. The secret never appears in
    /// logs; only its handle travels through the core.
    pub async fn register_credential(
        &self,
        provider: ProviderId,
        secret: SecretHandle,
        quota: QuotaConfig,
    ) -> Result<CredentialId> {
        let credential = Credential::new(provider, secret, quota);
        let record = credential.clone();
        let id = self.registry.register_credential(credential)?;
        self.store.save_credential(&record).await?;
        Ok(id)
    }

    /// Administratively invalidate a credential without removing its
    /// record. Terminal until the credential is re-registered.
    pub async fn deactivate_credential(&self, id: CredentialId) -> Result<()> {
        self.registry.deactivate_credential(id)?;
        let record = self.registry.credential_record(id)?;
        self.store.save_credential(&record).await?;
        Ok(())
    }

    pub async fn remove_credential(&self, id: CredentialId) -> Result<()> {
        self.registry.remove_credential(id)?;
        self.store.delete_credential(id).await?;
        Ok(())
    }

    /// Probe a credential with a lightweight call when an adapter is
    /// registered, then report its health. Without an adapter this is a
    /// passive health read. The probe goes through a normal lease, so it is
    /// metered and affects health like any other call.
    pub async fn test_credential(&self, id: CredentialId) -> Result<HealthSnapshot> {
        let snapshot = self.registry.health_snapshot(id)?;
        let Some(adapter) = self.adapters.get(&snapshot.provider) else {
            return Ok(snapshot);
        };
        let Some(provider) = self.registry.provider(&snapshot.provider) else {
            return Ok(snapshot);
        };
        let Some(capability) = provider.capabilities.iter().next().copied() else {
            return Ok(snapshot);
        };

        let lease = self.registry.acquire_credential(id, capability, 1)?;
        let secret = self.registry.secret(id)?;
        let called = tokio::time::timeout(
            provider.call_timeout(),
            adapter.call(capability, &json!({"probe": true}), &secret),
        )
        .await;
        let outcome = match &called {
            Ok(Ok(_)) => LeaseOutcome::Success,
            Ok(Err(err)) => err.lease_outcome(),
            Err(_) => LeaseOutcome::Timeout,
        };
        self.registry.release(lease, outcome);
        self.registry.health_snapshot(id).map_err(Into::into)
    }

    pub fn credential_health(&self) -> Vec<HealthSnapshot> {
        self.registry.all_health_snapshots()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.registry.alerts()
    }

    // ---- persistence ----

    /// Write current usage windows to the store so a restart does not
    /// re-spend quota that was already consumed.
    pub async fn persist_usage(&self) -> Result<()> {
        let snapshots = self.registry.export_usage();
        self.store.save_usage(&snapshots).await?;
        Ok(())
    }

    /// Restore credentials, usage windows, and workflows from the store.
    /// Queued workflows re-enter the admission queue; paused and terminal
    /// ones become queryable records.
    pub async fn recover(&self) -> Result<RecoverySummary> {
        let mut summary = RecoverySummary::default();

        for credential in self.store.load_credentials().await? {
            match self.registry.register_credential(credential) {
                Ok(_) => summary.credentials += 1,
                Err(err) => {
                    warn!(error = %err, "skipping credential during recovery");
                }
            }
        }
        self.registry.restore_usage(self.store.load_usage().await?);

        for workflow in self.store.load_workflows().await? {
            match workflow.status {
                WorkflowState::Queued => {
                    self.scheduler.enqueue_existing(workflow);
                    summary.requeued_workflows += 1;
                }
                _ => {
                    self.scheduler.restore_record(workflow);
                    summary.restored_workflows += 1;
                }
            }
        }
        info!(
            credentials = summary.credentials,
            requeued = summary.requeued_workflows,
            restored = summary.restored_workflows,
            "recovery complete"
        );
        Ok(summary)
    }

    /// Persist usage and stop the admission loop. Running workflows finish
    /// on their own tasks.
    pub async fn shutdown(&self) -> Result<()> {
        self.persist_usage().await?;
        self.scheduler.shutdown().await;
        Ok(())
    }
}
