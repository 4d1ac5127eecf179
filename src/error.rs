//! Top-level error taxonomy.
//!
//! Module-local error enums (`credentials`, `state_machine`, `config`,
//! `storage`) convert into [`CoreError`] so the exposed interface surfaces a
//! single, matchable type. Transient provider errors never appear here: the
//! step executor recovers them locally and only their exhaustion surfaces,
//! as [`CoreError::StepFailed`].

use crate::credentials::CredentialError;
use crate::state_machine::StateMachineError;
use crate::storage::StorageError;
use uuid::Uuid;

/// Errors surfaced by the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Credential pool errors: no headroom, duplicate registration, unknown
    /// provider or credential.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// An attempted workflow transition not present in the transition table.
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// A step exhausted its retry/failover budget.
    #[error("step {step_index} failed: {last_error}")]
    StepFailed {
        step_index: usize,
        last_error: String,
    },

    /// Unknown methodology or malformed step list.
    #[error("invalid workflow spec: {0}")]
    InvalidWorkflowSpec(String),

    /// No workflow registered under the given id.
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: Uuid },

    /// The admission queue is full; distinct from quota exhaustion so
    /// callers can tell "the system is saturated" from "wait for quota".
    #[error("admission queue is full")]
    NoCapacity,

    #[error(transparent)]
    Configuration(#[from] crate::config::ConfigurationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
