//! Credential registry.
//!
//! Owns every registered provider and credential, meters quota through the
//! rate controller, and hands out exclusive leases. All quota accounting
//! happens under one lock with no awaits inside, so check-and-reserve is
//! atomic: two concurrent acquires can never both claim the last unit of
//! headroom.

use super::lease::{Lease, LeaseOutcome};
use super::rate_controller::{ErrorWindow, RateController, UsageWindow};
use crate::config::RateLimiterConfig;
use crate::constants;
use crate::models::credential::{
    Credential, CredentialId, CredentialStatus, HealthSnapshot, SecretHandle, WindowKind,
};
use crate::models::provider::{Capability, Provider, ProviderId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Errors raised by credential registration and leasing.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// Every candidate credential is invalid, rate limited, or out of
    /// buffered headroom. `retry_after` is the earliest instant any
    /// candidate may free up, when that is knowable.
    #[error("no credential available")]
    NoAvailableCredential {
        retry_after: Option<DateTime<Utc>>,
    },

    /// The provider is registered but does not offer the capability.
    #[error("provider {provider} does not support {capability}")]
    ProviderUnavailable {
        provider: ProviderId,
        capability: Capability,
    },

    /// Same secret already registered for this provider.
    #[error("credential already registered for provider {provider}")]
    DuplicateCredential { provider: ProviderId },

    /// Credential references a provider nobody registered.
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: ProviderId },

    #[error("credential not found: {credential_id}")]
    NotFound { credential_id: CredentialId },
}

/// Health events surfaced to operators. Kept in a bounded ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AtRisk,
    RateLimited,
    Invalid,
    Recovered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub at: DateTime<Utc>,
    pub credential_id: CredentialId,
    pub provider: ProviderId,
    pub kind: AlertKind,
    pub message: String,
}

/// Persistable usage events for one credential window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowEvents {
    pub kind: WindowKind,
    pub events: Vec<(DateTime<Utc>, u32)>,
}

/// Persistable usage state for one credential, for restart recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub credential_id: CredentialId,
    pub windows: Vec<WindowEvents>,
}

struct CredentialEntry {
    credential: Credential,
    windows: Vec<UsageWindow>,
    /// Total weight of outstanding leases.
    in_flight: u32,
    errors: ErrorWindow,
}

impl CredentialEntry {
    fn new(credential: Credential) -> Self {
        let windows = credential
            .quota
            .windows()
            .into_iter()
            .map(|(kind, limit)| UsageWindow::new(kind, limit))
            .collect();
        Self {
            credential,
            windows,
            in_flight: 0,
            errors: ErrorWindow::default(),
        }
    }
}

struct RegistryInner {
    providers: HashMap<ProviderId, Provider>,
    credentials: HashMap<CredentialId, CredentialEntry>,
    alerts: VecDeque<Alert>,
}

/// Shared credential registry. Cheap to clone via `Arc`.
pub struct CredentialRegistry {
    inner: Mutex<RegistryInner>,
    controller: RateController,
    /// Woken whenever capacity may have opened up: a lease release, a new
    /// credential, or a credential recovering from backoff.
    availability: Arc<Notify>,
}

impl CredentialRegistry {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                providers: HashMap::new(),
                credentials: HashMap::new(),
                alerts: VecDeque::new(),
            }),
            controller: RateController::new(config),
            availability: Arc::new(Notify::new()),
        }
    }

    /// Notify handle the scheduler waits on for admission retries.
    pub fn availability(&self) -> Arc<Notify> {
        Arc::clone(&self.availability)
    }

    pub fn register_provider(&self, provider: Provider) {
        debug!(provider = %provider.id, "provider registered");
        self.inner.lock().providers.insert(provider.id.clone(), provider);
    }

    pub fn provider(&self, id: &ProviderId) -> Option<Provider> {
        self.inner.lock().providers.get(id).cloned()
    }

    pub fn register_credential(&self, credential: Credential) -> Result<CredentialId, CredentialError> {
        let mut inner = self.inner.lock();
        if !inner.providers.contains_key(&credential.provider) {
            return Err(CredentialError::UnknownProvider {
                provider: credential.provider,
            });
        }
        let duplicate = inner.credentials.values().any(|entry| {
            entry.credential.provider == credential.provider
                && entry.credential.secret == credential.secret
        });
        if duplicate {
            return Err(CredentialError::DuplicateCredential {
                provider: credential.provider,
            });
        }

        let id = credential.id;
        info!(credential_id = %id, provider = %credential.provider, "credential registered");
        inner.credentials.insert(id, CredentialEntry::new(credential));
        drop(inner);
        self.availability.notify_waiters();
        Ok(id)
    }

    pub fn remove_credential(&self, id: CredentialId) -> Result<Credential, CredentialError> {
        let entry = self
            .inner
            .lock()
            .credentials
            .remove(&id)
            .ok_or(CredentialError::NotFound { credential_id: id })?;
        info!(credential_id = %id, provider = %entry.credential.provider, "credential removed");
        Ok(entry.credential)
    }

    /// Current durable record for a credential, for persistence.
    pub(crate) fn credential_record(&self, id: CredentialId) -> Result<Credential, CredentialError> {
        self.inner
            .lock()
            .credentials
            .get(&id)
            .map(|entry| entry.credential.clone())
            .ok_or(CredentialError::NotFound { credential_id: id })
    }

    /// Raw secret for a leased credential, to hand to the service adapter.
    pub fn secret(&self, id: CredentialId) -> Result<SecretHandle, CredentialError> {
        self.inner
            .lock()
            .credentials
            .get(&id)
            .map(|entry| entry.credential.secret.clone())
            .ok_or(CredentialError::NotFound { credential_id: id })
    }

    /// Reserve quota headroom on the best credential for a provider.
    ///
    /// Selection is greedy on headroom: among eligible credentials the one
    /// with the largest remaining fraction in its tightest window wins, with
    /// least-recently-used breaking ties so equally-loaded credentials
    /// alternate.
    pub fn acquire(
        &self,
        provider: &ProviderId,
        capability: Capability,
        weight: u32,
    ) -> Result<Lease, CredentialError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let descriptor = inner
            .providers
            .get(provider)
            .ok_or_else(|| CredentialError::UnknownProvider {
                provider: provider.clone(),
            })?;
        if !descriptor.supports(capability) {
            return Err(CredentialError::ProviderUnavailable {
                provider: provider.clone(),
                capability,
            });
        }

        let controller = &self.controller;
        let mut best: Option<(CredentialId, f64, Option<DateTime<Utc>>)> = None;
        let mut retry_after: Option<DateTime<Utc>> = None;

        for (id, entry) in inner
            .credentials
            .iter_mut()
            .filter(|(_, e)| e.credential.provider == *provider)
        {
            Self::refresh_status(controller, entry, now, &mut inner.alerts);

            if !entry.credential.status.is_selectable() {
                if let CredentialStatus::RateLimited { until } = entry.credential.status {
                    retry_after = min_instant(retry_after, Some(until));
                }
                continue;
            }

            let in_flight = entry.in_flight;
            let fits_all = entry
                .windows
                .iter_mut()
                .all(|w| controller.fits(w, now, in_flight, weight));
            if !fits_all {
                let soonest = entry
                    .windows
                    .iter_mut()
                    .filter_map(|w| w.oldest_expiry(now))
                    .min();
                retry_after = min_instant(retry_after, soonest);
                continue;
            }

            let headroom = entry
                .windows
                .iter_mut()
                .map(|w| controller.headroom_ratio(w, now, in_flight))
                .fold(1.0f64, f64::min);
            let last_used = entry.credential.last_used;

            let better = match &best {
                None => true,
                Some((_, best_headroom, best_last_used)) => {
                    headroom > *best_headroom
                        || (headroom == *best_headroom && earlier(last_used, *best_last_used))
                }
            };
            if better {
                best = Some((*id, headroom, last_used));
            }
        }

        let Some((chosen, headroom, _)) = best else {
            return Err(CredentialError::NoAvailableCredential { retry_after });
        };

        let entry = inner
            .credentials
            .get_mut(&chosen)
            .ok_or(CredentialError::NotFound { credential_id: chosen })?;
        entry.in_flight += weight;
        entry.credential.last_used = Some(now);
        entry.credential.updated_at = now;

        debug!(
            credential_id = %chosen,
            provider = %provider,
            %capability,
            headroom = format!("{headroom:.3}"),
            "lease acquired"
        );
        Ok(Lease::new(chosen, provider.clone(), capability, weight))
    }

    /// Administratively invalidate a credential. Terminal until the
    /// credential is removed and re-registered.
    pub fn deactivate_credential(&self, id: CredentialId) -> Result<(), CredentialError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let entry = inner
            .credentials
            .get_mut(&id)
            .ok_or(CredentialError::NotFound { credential_id: id })?;
        entry.credential.status = CredentialStatus::Invalid;
        entry.credential.updated_at = now;
        info!(credential_id = %id, provider = %entry.credential.provider, "credential deactivated");
        push_alert(
            &mut inner.alerts,
            Alert {
                at: now,
                credential_id: id,
                provider: entry.credential.provider.clone(),
                kind: AlertKind::Invalid,
                message: "deactivated by operator".to_string(),
            },
        );
        Ok(())
    }

    /// Reserve headroom on one specific credential, bypassing selection.
    /// Used by credential probes.
    pub fn acquire_credential(
        &self,
        id: CredentialId,
        capability: Capability,
        weight: u32,
    ) -> Result<Lease, CredentialError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let entry = inner
            .credentials
            .get_mut(&id)
            .ok_or(CredentialError::NotFound { credential_id: id })?;
        Self::refresh_status(&self.controller, entry, now, &mut inner.alerts);

        if !entry.credential.status.is_selectable() {
            let retry_after = match entry.credential.status {
                CredentialStatus::RateLimited { until } => Some(until),
                _ => None,
            };
            return Err(CredentialError::NoAvailableCredential { retry_after });
        }
        let in_flight = entry.in_flight;
        let fits_all = entry
            .windows
            .iter_mut()
            .all(|w| self.controller.fits(w, now, in_flight, weight));
        if !fits_all {
            let retry_after = entry
                .windows
                .iter_mut()
                .filter_map(|w| w.oldest_expiry(now))
                .min();
            return Err(CredentialError::NoAvailableCredential { retry_after });
        }

        entry.in_flight += weight;
        entry.credential.last_used = Some(now);
        entry.credential.updated_at = now;
        let provider = entry.credential.provider.clone();
        Ok(Lease::new(id, provider, capability, weight))
    }

    /// Settle a lease. Consumes it: the reservation is returned and usage
    /// and health are recorded according to the outcome.
    pub fn release(&self, lease: Lease, outcome: LeaseOutcome) {
        let now = Utc::now();
        {
            let mut inner = self.inner.lock();
            let inner = &mut *inner;
            let backoff = inner
                .credentials
                .get(&lease.credential_id)
                .and_then(|e| inner.providers.get(&e.credential.provider))
                .map(|p| p.rate_limit_backoff())
                .unwrap_or(std::time::Duration::from_millis(
                    constants::DEFAULT_PROVIDER_BACKOFF_MS,
                ));

            let Some(entry) = inner.credentials.get_mut(&lease.credential_id) else {
                // Credential removed while the call was in flight.
                return;
            };

            entry.in_flight = entry.in_flight.saturating_sub(lease.weight);

            if outcome.consumes_quota() {
                for window in &mut entry.windows {
                    window.record(now, lease.weight);
                }
            }
            if outcome.affects_health() {
                self.controller
                    .record_health_sample(&mut entry.errors, now, outcome.is_failure());
            }

            match outcome {
                LeaseOutcome::RateLimited { retry_after } => {
                    let backoff = retry_after.unwrap_or(backoff);
                    let until = now
                        + ChronoDuration::from_std(backoff).unwrap_or(ChronoDuration::minutes(1));
                    entry.credential.status = CredentialStatus::RateLimited { until };
                    warn!(
                        credential_id = %lease.credential_id,
                        provider = %lease.provider,
                        %until,
                        "provider signalled rate limit; credential backed off"
                    );
                    push_alert(
                        &mut inner.alerts,
                        Alert {
                            at: now,
                            credential_id: lease.credential_id,
                            provider: lease.provider.clone(),
                            kind: AlertKind::RateLimited,
                            message: format!("provider rate limit, backed off until {until}"),
                        },
                    );
                }
                LeaseOutcome::AuthError => {
                    entry.credential.status = CredentialStatus::Invalid;
                    warn!(
                        credential_id = %lease.credential_id,
                        provider = %lease.provider,
                        "authentication failed; credential invalidated"
                    );
                    push_alert(
                        &mut inner.alerts,
                        Alert {
                            at: now,
                            credential_id: lease.credential_id,
                            provider: lease.provider.clone(),
                            kind: AlertKind::Invalid,
                            message: "authentication failure".to_string(),
                        },
                    );
                }
                _ => {
                    Self::refresh_status(&self.controller, entry, now, &mut inner.alerts);
                }
            }
            entry.credential.updated_at = now;
        }
        self.availability.notify_waiters();
    }

    /// Whether any candidate provider has a credential that could serve a
    /// unit-weight call right now. Used for admission checks.
    pub fn has_eligible(&self, candidates: &[ProviderId], capability: Capability) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let controller = &self.controller;

        candidates.iter().any(|provider| {
            let supported = inner
                .providers
                .get(provider)
                .is_some_and(|p| p.supports(capability));
            if !supported {
                return false;
            }
            inner
                .credentials
                .iter_mut()
                .filter(|(_, e)| e.credential.provider == *provider)
                .any(|(_, entry)| {
                    Self::refresh_status(controller, entry, now, &mut inner.alerts);
                    let in_flight = entry.in_flight;
                    entry.credential.status.is_selectable()
                        && entry
                            .windows
                            .iter_mut()
                            .all(|w| controller.fits(w, now, in_flight, 1))
                })
        })
    }

    /// Live health view for one credential.
    pub fn health_snapshot(&self, id: CredentialId) -> Result<HealthSnapshot, CredentialError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let entry = inner
            .credentials
            .get_mut(&id)
            .ok_or(CredentialError::NotFound { credential_id: id })?;
        Self::refresh_status(&self.controller, entry, now, &mut inner.alerts);
        Ok(Self::snapshot_entry(&self.controller, entry, now))
    }

    pub fn all_health_snapshots(&self) -> Vec<HealthSnapshot> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let controller = &self.controller;
        let mut snapshots: Vec<_> = inner
            .credentials
            .values_mut()
            .map(|entry| {
                Self::refresh_status(controller, entry, now, &mut inner.alerts);
                Self::snapshot_entry(controller, entry, now)
            })
            .collect();
        snapshots.sort_by(|a, b| a.provider.as_str().cmp(b.provider.as_str()));
        snapshots
    }

    /// Recent health alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().alerts.iter().cloned().collect()
    }

    /// Export live usage events for persistence.
    pub fn export_usage(&self) -> Vec<UsageSnapshot> {
        let inner = self.inner.lock();
        inner
            .credentials
            .iter()
            .map(|(id, entry)| UsageSnapshot {
                credential_id: *id,
                windows: entry
                    .windows
                    .iter()
                    .map(|w| WindowEvents {
                        kind: w.kind,
                        events: w.events().collect(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Re-seed usage windows from persisted snapshots after a restart.
    /// Snapshots for unknown credentials or windows are ignored.
    pub fn restore_usage(&self, snapshots: Vec<UsageSnapshot>) {
        let mut inner = self.inner.lock();
        for snapshot in snapshots {
            let Some(entry) = inner.credentials.get_mut(&snapshot.credential_id) else {
                continue;
            };
            for persisted in snapshot.windows {
                if let Some(window) = entry.windows.iter_mut().find(|w| w.kind == persisted.kind) {
                    window.restore_events(persisted.events);
                }
            }
        }
    }

    /// Lazily refresh a credential's status: expire backoffs, and move
    /// between Active and AtRisk based on projection and error rate.
    fn refresh_status(
        controller: &RateController,
        entry: &mut CredentialEntry,
        now: DateTime<Utc>,
        alerts: &mut VecDeque<Alert>,
    ) {
        match entry.credential.status {
            CredentialStatus::Invalid => return,
            CredentialStatus::RateLimited { until } => {
                if now < until {
                    return;
                }
                entry.credential.status = CredentialStatus::Active;
                push_alert(
                    alerts,
                    Alert {
                        at: now,
                        credential_id: entry.credential.id,
                        provider: entry.credential.provider.clone(),
                        kind: AlertKind::Recovered,
                        message: "rate limit backoff expired".to_string(),
                    },
                );
            }
            CredentialStatus::Active | CredentialStatus::AtRisk => {}
        }

        let projected = entry
            .windows
            .iter_mut()
            .any(|w| controller.projects_exhaustion(w, now));
        let erroring = controller.error_rate_excessive(&entry.errors, now);
        let at_risk = projected || erroring;

        match (entry.credential.status, at_risk) {
            (CredentialStatus::Active, true) => {
                entry.credential.status = CredentialStatus::AtRisk;
                let reason = if projected {
                    "projected quota exhaustion"
                } else {
                    "elevated error rate"
                };
                debug!(
                    credential_id = %entry.credential.id,
                    provider = %entry.credential.provider,
                    reason,
                    "credential at risk"
                );
                push_alert(
                    alerts,
                    Alert {
                        at: now,
                        credential_id: entry.credential.id,
                        provider: entry.credential.provider.clone(),
                        kind: AlertKind::AtRisk,
                        message: reason.to_string(),
                    },
                );
            }
            (CredentialStatus::AtRisk, false) => {
                entry.credential.status = CredentialStatus::Active;
            }
            _ => {}
        }
    }

    fn snapshot_entry(
        controller: &RateController,
        entry: &mut CredentialEntry,
        now: DateTime<Utc>,
    ) -> HealthSnapshot {
        let in_flight = entry.in_flight;
        let windows = entry
            .windows
            .iter_mut()
            .map(|w| controller.window_usage(w, now, in_flight))
            .collect();
        let projected_exhaustion = entry
            .windows
            .iter_mut()
            .filter_map(|w| controller.projected_exhaustion_at(w, now))
            .min();
        HealthSnapshot {
            credential_id: entry.credential.id,
            provider: entry.credential.provider.clone(),
            status: entry.credential.status,
            windows,
            error_rate: controller.error_rate(&entry.errors, now),
            projected_exhaustion,
            last_used: entry.credential.last_used,
        }
    }
}

fn push_alert(alerts: &mut VecDeque<Alert>, alert: Alert) {
    if alerts.len() >= constants::ALERT_HISTORY_LIMIT {
        alerts.pop_front();
    }
    alerts.push_back(alert);
}

fn min_instant(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn earlier(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        // Never used beats any timestamp.
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (None, None) => false,
        (Some(a), Some(b)) => a < b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credential::QuotaConfig;

    fn registry() -> CredentialRegistry {
        let registry = CredentialRegistry::new(&RateLimiterConfig::default());
        registry.register_provider(Provider::serpapi());
        registry
    }

    fn register(registry: &CredentialRegistry, secret: &str, quota: QuotaConfig) -> CredentialId {
        registry
            .register_credential(Credential::new(
                ProviderId::new("serpapi"),
                SecretHandle::new(secret),
                quota,
            ))
            .unwrap()
    }

    #[test]
    fn duplicate_secret_rejected() {
        let registry = registry();
        register(&registry, "key-1", QuotaConfig::per_minute(10));
        let err = registry
            .register_credential(Credential::new(
                ProviderId::new("serpapi"),
                SecretHandle::new("key-1"),
                QuotaConfig::per_minute(10),
            ))
            .unwrap_err();
        assert!(matches!(err, CredentialError::DuplicateCredential { .. }));
    }

    #[test]
    fn unknown_provider_rejected() {
        let registry = registry();
        let err = registry
            .register_credential(Credential::new(
                ProviderId::new("nonesuch"),
                SecretHandle::new("key"),
                QuotaConfig::per_minute(10),
            ))
            .unwrap_err();
        assert!(matches!(err, CredentialError::UnknownProvider { .. }));
    }

    #[test]
    fn buffered_limit_never_exceeded() {
        let registry = registry();
        register(&registry, "key-1", QuotaConfig::per_minute(10));

        // 10% buffer on 10/min leaves 9 usable.
        let mut leases = Vec::new();
        for _ in 0..9 {
            leases.push(
                registry
                    .acquire(&ProviderId::new("serpapi"), Capability::Search, 1)
                    .unwrap(),
            );
        }
        let err = registry
            .acquire(&ProviderId::new("serpapi"), Capability::Search, 1)
            .unwrap_err();
        assert!(matches!(err, CredentialError::NoAvailableCredential { .. }));

        // Settling the calls keeps the window full; still no headroom.
        for lease in leases {
            registry.release(lease, LeaseOutcome::Success);
        }
        assert!(registry
            .acquire(&ProviderId::new("serpapi"), Capability::Search, 1)
            .is_err());
    }

    #[test]
    fn failed_calls_return_reserved_headroom() {
        let registry = registry();
        register(&registry, "key-1", QuotaConfig::per_minute(10));
        let provider = ProviderId::new("serpapi");

        for _ in 0..9 {
            let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
            registry.release(lease, LeaseOutcome::NetworkError);
        }
        // Network errors consumed no quota, so all 9 units are still free.
        assert!(registry.acquire(&provider, Capability::Search, 1).is_ok());
    }

    #[test]
    fn selection_alternates_between_equal_credentials() {
        let registry = registry();
        let a = register(&registry, "key-a", QuotaConfig::per_minute(10_000));
        let b = register(&registry, "key-b", QuotaConfig::per_minute(10_000));
        let provider = ProviderId::new("serpapi");

        let mut counts: HashMap<CredentialId, u32> = HashMap::new();
        for _ in 0..1_000 {
            let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
            *counts.entry(lease.credential_id).or_default() += 1;
            registry.release(lease, LeaseOutcome::Success);
        }
        // Headroom selection with LRU tie-breaking alternates exactly.
        assert_eq!(counts.get(&a).copied().unwrap_or(0), 500);
        assert_eq!(counts.get(&b).copied().unwrap_or(0), 500);
    }

    #[test]
    fn deactivation_is_terminal() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(10));
        registry.deactivate_credential(id).unwrap();

        let snapshot = registry.health_snapshot(id).unwrap();
        assert_eq!(snapshot.status, CredentialStatus::Invalid);
        assert!(registry
            .acquire(&ProviderId::new("serpapi"), Capability::Search, 1)
            .is_err());
        assert!(registry.alerts().iter().any(|a| a.kind == AlertKind::Invalid));
    }

    #[test]
    fn rate_limited_outcome_backs_off_credential() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(100));
        let provider = ProviderId::new("serpapi");

        let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
        registry.release(lease, LeaseOutcome::RateLimited { retry_after: None });

        let err = registry.acquire(&provider, Capability::Search, 1).unwrap_err();
        match err {
            CredentialError::NoAvailableCredential { retry_after } => {
                assert!(retry_after.is_some());
                assert!(retry_after.unwrap() > Utc::now());
            }
            other => panic!("unexpected error: {other}"),
        }
        let snapshot = registry.health_snapshot(id).unwrap();
        assert!(matches!(snapshot.status, CredentialStatus::RateLimited { .. }));
        assert!(registry
            .alerts()
            .iter()
            .any(|a| a.kind == AlertKind::RateLimited));
    }

    #[test]
    fn explicit_retry_after_hint_overrides_default_backoff() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(100));
        let provider = ProviderId::new("serpapi");

        let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
        registry.release(
            lease,
            LeaseOutcome::RateLimited {
                retry_after: Some(std::time::Duration::from_secs(5)),
            },
        );

        // serpapi's default backoff is a minute; the hint shortens it.
        let snapshot = registry.health_snapshot(id).unwrap();
        match snapshot.status {
            CredentialStatus::RateLimited { until } => {
                let wait = until - Utc::now();
                assert!(wait.num_seconds() <= 5);
                assert!(wait.num_seconds() >= 3);
            }
            other => panic!("unexpected status: {other}"),
        }
    }

    #[test]
    fn auth_error_invalidates_credential() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(100));
        let provider = ProviderId::new("serpapi");

        let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
        registry.release(lease, LeaseOutcome::AuthError);

        let snapshot = registry.health_snapshot(id).unwrap();
        assert_eq!(snapshot.status, CredentialStatus::Invalid);
        assert!(registry.acquire(&provider, Capability::Search, 1).is_err());
        assert!(registry.alerts().iter().any(|a| a.kind == AlertKind::Invalid));
    }

    #[test]
    fn cancellation_leaves_quota_and_health_untouched() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(10));
        let provider = ProviderId::new("serpapi");

        let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
        registry.release(lease, LeaseOutcome::Cancelled);

        let snapshot = registry.health_snapshot(id).unwrap();
        assert_eq!(snapshot.status, CredentialStatus::Active);
        assert_eq!(snapshot.windows[0].used, 0);
        assert_eq!(snapshot.windows[0].in_flight, 0);
        assert_eq!(snapshot.error_rate, None);
    }

    #[test]
    fn malformed_response_still_consumes_quota() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(10));
        let provider = ProviderId::new("serpapi");

        let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
        registry.release(lease, LeaseOutcome::Malformed);

        let snapshot = registry.health_snapshot(id).unwrap();
        assert_eq!(snapshot.windows[0].used, 1);
    }

    #[test]
    fn sustained_burn_marks_credential_at_risk_but_selectable() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(100));
        let provider = ProviderId::new("serpapi");

        // 30 rapid successes: burn rate ~2/s projects well past the
        // buffered limit of 90 before the window starts draining.
        for _ in 0..30 {
            let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
            registry.release(lease, LeaseOutcome::Success);
        }

        let snapshot = registry.health_snapshot(id).unwrap();
        assert_eq!(snapshot.status, CredentialStatus::AtRisk);
        assert!(snapshot.projected_exhaustion.is_some());
        // AtRisk deprioritizes but does not block.
        assert!(registry.acquire(&provider, Capability::Search, 1).is_ok());
    }

    #[test]
    fn capability_mismatch_is_an_error() {
        let registry = registry();
        register(&registry, "key-1", QuotaConfig::per_minute(10));
        let err = registry
            .acquire(&ProviderId::new("serpapi"), Capability::Complete, 1)
            .unwrap_err();
        assert!(matches!(err, CredentialError::ProviderUnavailable { .. }));
    }

    #[test]
    fn has_eligible_reflects_headroom() {
        let registry = registry();
        register(&registry, "key-1", QuotaConfig::per_minute(10));
        let candidates = [ProviderId::new("serpapi")];

        assert!(registry.has_eligible(&candidates, Capability::Search));

        let mut leases = Vec::new();
        for _ in 0..9 {
            leases.push(
                registry
                    .acquire(&ProviderId::new("serpapi"), Capability::Search, 1)
                    .unwrap(),
            );
        }
        assert!(!registry.has_eligible(&candidates, Capability::Search));

        registry.release(leases.pop().unwrap(), LeaseOutcome::NetworkError);
        assert!(registry.has_eligible(&candidates, Capability::Search));
        for lease in leases {
            registry.release(lease, LeaseOutcome::Cancelled);
        }
    }

    #[test]
    fn usage_survives_export_and_restore() {
        let registry = registry();
        let id = register(&registry, "key-1", QuotaConfig::per_minute(10));
        let provider = ProviderId::new("serpapi");

        for _ in 0..4 {
            let lease = registry.acquire(&provider, Capability::Search, 1).unwrap();
            registry.release(lease, LeaseOutcome::Success);
        }
        let exported = registry.export_usage();

        let fresh = CredentialRegistry::new(&RateLimiterConfig::default());
        fresh.register_provider(Provider::serpapi());
        let mut credential = Credential::new(
            ProviderId::new("serpapi"),
            SecretHandle::new("key-1"),
            QuotaConfig::per_minute(10),
        );
        credential.id = id;
        fresh.register_credential(credential).unwrap();
        fresh.restore_usage(exported);

        let snapshot = fresh.health_snapshot(id).unwrap();
        assert_eq!(snapshot.windows[0].used, 4);
    }
}
