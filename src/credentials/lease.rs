//! Lease handles for checked-out credentials.
//!
//! A lease is a reservation against a credential's quota windows. It is a
//! move-only value: the registry hands it out on acquire and consumes it on
//! release, so a lease cannot be double-released or forgotten silently.

use crate::models::credential::CredentialId;
use crate::models::provider::{Capability, ProviderId};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// How a leased call ended. Drives usage accounting and credential health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Call succeeded; usage is recorded in every quota window.
    Success,
    /// Provider explicitly signalled quota exhaustion. An explicit
    /// retry-after hint overrides the provider's default backoff.
    RateLimited { retry_after: Option<Duration> },
    /// Provider rejected the credential. Marks it invalid.
    AuthError,
    /// Transport failure before a response; no quota consumed.
    NetworkError,
    /// The call hit its deadline; no quota consumed.
    Timeout,
    /// Provider answered with an unusable response. The request still
    /// counted against the quota.
    Malformed,
    /// The workflow was cancelled mid-call; result discarded, no quota
    /// consumed, health unaffected.
    Cancelled,
}

impl LeaseOutcome {
    /// Whether this outcome consumed provider quota.
    pub fn consumes_quota(&self) -> bool {
        matches!(self, Self::Success | Self::Malformed)
    }

    /// Whether this outcome counts as a sample in the rolling error window.
    pub fn affects_health(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Whether this outcome counts as a failure sample.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::AuthError
                | Self::NetworkError
                | Self::Timeout
                | Self::Malformed
        )
    }
}

/// An exclusive reservation of quota headroom on one credential.
///
/// Deliberately not `Clone`: exactly one release per acquire.
#[derive(Debug)]
pub struct Lease {
    pub id: Uuid,
    pub credential_id: CredentialId,
    pub provider: ProviderId,
    pub capability: Capability,
    /// Quota units this call counts as (1 for a plain request).
    pub weight: u32,
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    pub(crate) fn new(
        credential_id: CredentialId,
        provider: ProviderId,
        capability: Capability,
        weight: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            credential_id,
            provider,
            capability,
            weight,
            acquired_at: Utc::now(),
        }
    }
}
