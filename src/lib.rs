//! # Research Core
//!
//! Embeddable orchestration core for multi-step research workflows across
//! rate-limited external services. It owns four concerns:
//!
//! - **Credentials & quotas** — a registry of provider credentials with
//!   fixed quota windows, leased atomically so concurrent steps can never
//!   overshoot a limit ([`credentials`]).
//! - **Predictive rate control** — a safety buffer below every limit plus
//!   burn-rate extrapolation, throttling *before* providers start
//!   rejecting ([`credentials::RateController`]).
//! - **Step execution** — per-step provider failover, bounded retries with
//!   jittered exponential backoff, and mandatory call timeouts
//!   ([`orchestration::StepExecutor`]).
//! - **Scheduling** — a priority admission queue feeding a bounded set of
//!   running workflows, wake-driven by completions and credential releases
//!   ([`orchestration::Scheduler`]).
//!
//! [`ResearchCore`] ties these together behind one handle:
//!
//! ```rust,no_run
//! use research_core::config::CoreConfig;
//! use research_core::ResearchCore;
//! use serde_json::json;
//!
//! # async fn demo() -> research_core::Result<()> {
//! let core = ResearchCore::new(CoreConfig::default())?;
//! let id = core
//!     .create_workflow("cost_optimized", json!({"query": "rust async"}), 0)
//!     .await?;
//! let status = core.get_status(id)?;
//! println!("workflow {} is {}", id, status.status);
//! # Ok(())
//! # }
//! ```
//!
//! Provider wire formats stay outside the core: embedders implement
//! [`adapter::ServiceAdapter`] per provider and register it alongside the
//! provider's credentials.

pub mod adapter;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod methodology;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod storage;

pub use error::{CoreError, Result};
pub use models::credential::{CredentialId, HealthSnapshot, QuotaConfig, SecretHandle};
pub use models::provider::{Capability, Provider, ProviderId};
pub use models::workflow::{StepSpec, WorkflowId, WorkflowSpec, WorkflowStatusView};
pub use orchestration::{QueueStatistics, ResearchCore};
pub use state_machine::{StepState, WorkflowState};
