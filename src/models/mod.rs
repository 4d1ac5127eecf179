//! Core data model: providers, credentials, workflows.

pub mod credential;
pub mod provider;
pub mod workflow;

pub use credential::{
    Credential, CredentialId, CredentialStatus, HealthSnapshot, QuotaConfig, SecretHandle,
    WindowKind, WindowUsage,
};
pub use provider::{Capability, Provider, ProviderId};
pub use workflow::{
    StepSpec, Workflow, WorkflowId, WorkflowSpec, WorkflowStatusView, WorkflowStep,
};
