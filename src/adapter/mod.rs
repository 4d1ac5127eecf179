//! Service adapter boundary.
//!
//! One adapter per provider. The core hands an adapter a capability and an
//! opaque payload and gets back an opaque response or a typed failure; it
//! never inspects provider wire formats beyond this result.

pub mod fake;

use crate::credentials::lease::LeaseOutcome;
use crate::models::credential::SecretHandle;
use crate::models::provider::{Capability, ProviderId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use fake::FakeAdapter;

/// Typed failure classes an adapter may report.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Provider explicitly signalled quota exhaustion. Authoritative: the
    /// credential is backed off regardless of internal projection.
    #[error("provider signalled rate limit")]
    RateLimited { retry_after: Option<Duration> },

    /// Credential rejected. Never retried automatically.
    #[error("authentication failed: {0}")]
    AuthError(String),

    /// Transport-level failure; the request did not consume quota.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The call exceeded its deadline.
    #[error("call timed out")]
    Timeout,

    /// Provider answered with something unusable. Not retryable.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AdapterError {
    /// Classify this failure as a lease outcome for usage/health accounting.
    pub fn lease_outcome(&self) -> LeaseOutcome {
        match self {
            Self::RateLimited { retry_after } => LeaseOutcome::RateLimited {
                retry_after: *retry_after,
            },
            Self::AuthError(_) => LeaseOutcome::AuthError,
            Self::NetworkError(_) => LeaseOutcome::NetworkError,
            Self::Timeout => LeaseOutcome::Timeout,
            Self::Malformed(_) => LeaseOutcome::Malformed,
        }
    }

    /// Transient failures are recoverable by backoff and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::Timeout)
    }
}

/// One external provider integration.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Invoke the provider. The secret comes from the leased credential;
    /// implementations must not retain it.
    async fn call(
        &self,
        capability: Capability,
        payload: &Value,
        secret: &SecretHandle,
    ) -> Result<Value, AdapterError>;
}

/// Adapter lookup table, keyed by provider.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<ProviderId, Arc<dyn ServiceAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: ProviderId, adapter: Arc<dyn ServiceAdapter>) {
        self.adapters.write().insert(provider, adapter);
    }

    pub fn get(&self, provider: &ProviderId) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.read().get(provider).cloned()
    }

    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.adapters.read().contains_key(provider)
    }
}
