//! Credential records and quota configuration.
//!
//! A credential is a registered secret plus quota state for one provider
//! account. The record here is the durable shape; live usage windows and
//! in-flight reservations are owned by the credential registry and exposed
//! read-only through [`HealthSnapshot`].

use super::provider::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub type CredentialId = Uuid;

/// Opaque secret handle. Displays and debugs redacted so it can never leak
/// through logs or error messages.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHandle(String);

impl SecretHandle {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Access the raw secret. Callers hand it to a service adapter; it must
    /// not travel anywhere else.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHandle(****)")
    }
}

impl fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Fixed quota windows a credential is metered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    PerMinute,
    PerDay,
}

impl WindowKind {
    pub fn duration(&self) -> Duration {
        match self {
            Self::PerMinute => Duration::from_secs(60),
            Self::PerDay => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerMinute => write!(f, "per_minute"),
            Self::PerDay => write!(f, "per_day"),
        }
    }
}

/// Configured request quota per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub per_minute: Option<u32>,
    pub per_day: Option<u32>,
}

impl QuotaConfig {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            per_minute: Some(limit),
            per_day: None,
        }
    }

    pub fn per_day(limit: u32) -> Self {
        Self {
            per_minute: None,
            per_day: Some(limit),
        }
    }

    pub fn and_per_day(mut self, limit: u32) -> Self {
        self.per_day = Some(limit);
        self
    }

    /// Enumerate the configured windows as (kind, limit) pairs.
    pub fn windows(&self) -> Vec<(WindowKind, u32)> {
        let mut windows = Vec::new();
        if let Some(limit) = self.per_minute {
            windows.push((WindowKind::PerMinute, limit));
        }
        if let Some(limit) = self.per_day {
            windows.push((WindowKind::PerDay, limit));
        }
        windows
    }

    pub fn is_empty(&self) -> bool {
        self.per_minute.is_none() && self.per_day.is_none()
    }
}

/// Health of a credential as seen by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Healthy; full candidate for selection.
    Active,
    /// Projected quota exhaustion or elevated error rate; still selectable
    /// but deprioritized.
    AtRisk,
    /// Provider explicitly signalled quota exhaustion; blocked until the
    /// timer expires.
    RateLimited { until: DateTime<Utc> },
    /// Auth failure or admin deactivation; terminal until re-registered.
    Invalid,
}

impl CredentialStatus {
    /// Whether the selector may consider this credential at all.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Active | Self::AtRisk)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid)
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::AtRisk => write!(f, "at_risk"),
            Self::RateLimited { until } => write!(f, "rate_limited until {until}"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// Durable credential record. Owned exclusively by the credential registry;
/// mutated only through lease acquire/release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub provider: ProviderId,
    pub secret: SecretHandle,
    pub quota: QuotaConfig,
    pub status: CredentialStatus,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(provider: ProviderId, secret: SecretHandle, quota: QuotaConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider,
            secret,
            quota,
            status: CredentialStatus::Active,
            last_used: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-window usage as reported in a [`HealthSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowUsage {
    pub kind: WindowKind,
    pub used: u32,
    pub in_flight: u32,
    pub limit: u32,
    /// Remaining fraction of the window after the safety buffer.
    pub headroom_ratio: f64,
}

/// Read-only view of a credential's live health, backing `test_credential`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub credential_id: CredentialId,
    pub provider: ProviderId,
    pub status: CredentialStatus,
    pub windows: Vec<WindowUsage>,
    /// Failure ratio over the rolling error window, if enough samples exist.
    pub error_rate: Option<f64>,
    /// Projected instant the tightest window crosses its buffered limit.
    pub projected_exhaustion: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}
