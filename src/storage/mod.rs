//! Durable record storage.
//!
//! The core persists credentials, terminal workflows, and usage snapshots
//! through the [`RecordStore`] trait so restart recovery never re-spends
//! quota that was already consumed. [`InMemoryStore`] is the default
//! backend; embedders supply their own for real durability.

use crate::credentials::UsageSnapshot;
use crate::models::credential::{Credential, CredentialId};
use crate::models::workflow::{Workflow, WorkflowId};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Persistence boundary for the orchestration core.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_credential(&self, credential: &Credential) -> StorageResult<()>;
    async fn delete_credential(&self, id: CredentialId) -> StorageResult<()>;
    async fn load_credentials(&self) -> StorageResult<Vec<Credential>>;

    async fn save_workflow(&self, workflow: &Workflow) -> StorageResult<()>;
    async fn load_workflows(&self) -> StorageResult<Vec<Workflow>>;

    /// Replace the persisted usage snapshots wholesale.
    async fn save_usage(&self, snapshots: &[UsageSnapshot]) -> StorageResult<()>;
    async fn load_usage(&self) -> StorageResult<Vec<UsageSnapshot>>;
}

/// Default non-durable backend.
#[derive(Default)]
pub struct InMemoryStore {
    credentials: RwLock<HashMap<CredentialId, Credential>>,
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    usage: RwLock<Vec<UsageSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn save_credential(&self, credential: &Credential) -> StorageResult<()> {
        self.credentials
            .write()
            .await
            .insert(credential.id, credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, id: CredentialId) -> StorageResult<()> {
        self.credentials
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("credential {id}")))
    }

    async fn load_credentials(&self) -> StorageResult<Vec<Credential>> {
        Ok(self.credentials.read().await.values().cloned().collect())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> StorageResult<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn load_workflows(&self) -> StorageResult<Vec<Workflow>> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }

    async fn save_usage(&self, snapshots: &[UsageSnapshot]) -> StorageResult<()> {
        *self.usage.write().await = snapshots.to_vec();
        Ok(())
    }

    async fn load_usage(&self) -> StorageResult<Vec<UsageSnapshot>> {
        Ok(self.usage.read().await.clone())
    }
}
