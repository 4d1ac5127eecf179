//! Predictive rate controller.
//!
//! Pure window math over timestamped usage events. The controller never
//! waits for a provider to say "429": it keeps a safety buffer below every
//! configured limit and extrapolates the recent burn rate forward to flag
//! credentials that are on track to exhaust a window.

use crate::config::RateLimiterConfig;
use crate::models::credential::{WindowKind, WindowUsage};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// One rolling quota window with its recorded usage events.
#[derive(Debug, Clone)]
pub struct UsageWindow {
    pub kind: WindowKind,
    pub limit: u32,
    duration: Duration,
    /// (timestamp, weight) pairs, oldest first. Pruned lazily on access.
    events: VecDeque<(DateTime<Utc>, u32)>,
}

impl UsageWindow {
    pub fn new(kind: WindowKind, limit: u32) -> Self {
        Self {
            kind,
            limit,
            duration: kind.duration(),
            events: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::from_std(self.duration).unwrap_or(ChronoDuration::zero());
        while let Some(&(at, _)) = self.events.front() {
            if at <= cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Weighted usage currently inside the window.
    pub fn used(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.events.iter().map(|(_, w)| w).sum()
    }

    pub fn record(&mut self, now: DateTime<Utc>, weight: u32) {
        self.prune(now);
        self.events.push_back((now, weight));
    }

    /// Instant the oldest in-window event ages out, freeing its weight.
    pub fn oldest_expiry(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.prune(now);
        let span = ChronoDuration::from_std(self.duration).unwrap_or(ChronoDuration::zero());
        self.events.front().map(|&(at, _)| at + span)
    }

    /// Weighted usage recorded within the trailing sample interval.
    fn recent_usage(&mut self, now: DateTime<Utc>, sample: Duration) -> u32 {
        self.prune(now);
        let cutoff = now - ChronoDuration::from_std(sample).unwrap_or(ChronoDuration::zero());
        self.events
            .iter()
            .rev()
            .take_while(|&&(at, _)| at > cutoff)
            .map(|(_, w)| w)
            .sum()
    }

    pub fn events(&self) -> impl Iterator<Item = (DateTime<Utc>, u32)> + '_ {
        self.events.iter().copied()
    }

    pub fn restore_events(&mut self, events: impl IntoIterator<Item = (DateTime<Utc>, u32)>) {
        self.events = events.into_iter().collect();
    }
}

/// Rolling success/failure samples for one credential.
#[derive(Debug, Clone, Default)]
pub struct ErrorWindow {
    /// (timestamp, failed) pairs, oldest first.
    samples: VecDeque<(DateTime<Utc>, bool)>,
}

impl ErrorWindow {
    pub fn record(&mut self, now: DateTime<Utc>, failed: bool, window: Duration) {
        let cutoff = now - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        while let Some(&(at, _)) = self.samples.front() {
            if at <= cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.samples.push_back((now, failed));
    }

    /// Failure ratio over the window, once enough samples exist.
    pub fn rate(&self, now: DateTime<Utc>, window: Duration, min_samples: usize) -> Option<f64> {
        let cutoff = now - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        let mut total = 0usize;
        let mut failed = 0usize;
        for &(at, was_failure) in self.samples.iter().rev() {
            if at <= cutoff {
                break;
            }
            total += 1;
            if was_failure {
                failed += 1;
            }
        }
        if total < min_samples {
            None
        } else {
            Some(failed as f64 / total as f64)
        }
    }
}

/// Buffer and projection policy applied uniformly to every window.
#[derive(Debug, Clone)]
pub struct RateController {
    buffer_fraction: f64,
    burn_sample: Duration,
    error_rate_window: Duration,
    error_rate_threshold: f64,
    error_rate_min_samples: usize,
}

impl RateController {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            buffer_fraction: config.buffer_fraction,
            burn_sample: config.burn_sample(),
            error_rate_window: config.error_rate_window(),
            error_rate_threshold: config.error_rate_threshold,
            error_rate_min_samples: config.error_rate_min_samples,
        }
    }

    /// Usable portion of a limit once the safety buffer is held back.
    pub fn effective_limit(&self, limit: u32) -> u32 {
        let buffer = (f64::from(limit) * self.buffer_fraction).ceil() as u32;
        limit.saturating_sub(buffer)
    }

    /// Whether a call of `weight` fits under the buffered limit, counting
    /// both settled usage and in-flight reservations.
    pub fn fits(&self, window: &mut UsageWindow, now: DateTime<Utc>, in_flight: u32, weight: u32) -> bool {
        let committed = window.used(now) as u64 + u64::from(in_flight) + u64::from(weight);
        committed <= u64::from(self.effective_limit(window.limit))
    }

    /// Remaining fraction of the buffered limit, in [0, 1].
    pub fn headroom_ratio(&self, window: &mut UsageWindow, now: DateTime<Utc>, in_flight: u32) -> f64 {
        let effective = self.effective_limit(window.limit);
        if effective == 0 {
            return 0.0;
        }
        let committed = window.used(now).saturating_add(in_flight);
        let remaining = effective.saturating_sub(committed);
        f64::from(remaining) / f64::from(effective)
    }

    /// Recent burn rate in weighted requests per second.
    pub fn burn_rate(&self, window: &mut UsageWindow, now: DateTime<Utc>) -> f64 {
        let sample_secs = self.burn_sample.as_secs_f64();
        if sample_secs <= 0.0 {
            return 0.0;
        }
        f64::from(window.recent_usage(now, self.burn_sample)) / sample_secs
    }

    /// Linear extrapolation of usage to the point the window starts
    /// releasing weight again. Over the buffered limit means the credential
    /// is on track to exhaust.
    pub fn projected_usage(&self, window: &mut UsageWindow, now: DateTime<Utc>) -> f64 {
        let used = f64::from(window.used(now));
        let Some(expiry) = window.oldest_expiry(now) else {
            return used;
        };
        let remaining_secs = (expiry - now).num_milliseconds().max(0) as f64 / 1000.0;
        used + self.burn_rate(window, now) * remaining_secs
    }

    /// Whether the projection crosses the buffered limit.
    pub fn projects_exhaustion(&self, window: &mut UsageWindow, now: DateTime<Utc>) -> bool {
        self.projected_usage(window, now) > f64::from(self.effective_limit(window.limit))
    }

    /// Instant the buffered limit is projected to be crossed at the current
    /// burn rate, if it is crossed at all.
    pub fn projected_exhaustion_at(
        &self,
        window: &mut UsageWindow,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !self.projects_exhaustion(window, now) {
            return None;
        }
        let rate = self.burn_rate(window, now);
        if rate <= 0.0 {
            return None;
        }
        let remaining = f64::from(self.effective_limit(window.limit)) - f64::from(window.used(now));
        let secs = (remaining.max(0.0) / rate * 1000.0) as i64;
        Some(now + ChronoDuration::milliseconds(secs))
    }

    /// Failure ratio over the rolling error window, if enough samples exist.
    pub fn error_rate(&self, errors: &ErrorWindow, now: DateTime<Utc>) -> Option<f64> {
        errors.rate(now, self.error_rate_window, self.error_rate_min_samples)
    }

    /// Whether the error rate crosses the health threshold.
    pub fn error_rate_excessive(&self, errors: &ErrorWindow, now: DateTime<Utc>) -> bool {
        self.error_rate(errors, now)
            .is_some_and(|rate| rate >= self.error_rate_threshold)
    }

    pub fn record_health_sample(&self, errors: &mut ErrorWindow, now: DateTime<Utc>, failed: bool) {
        errors.record(now, failed, self.error_rate_window);
    }

    /// Snapshot one window for health reporting.
    pub fn window_usage(&self, window: &mut UsageWindow, now: DateTime<Utc>, in_flight: u32) -> WindowUsage {
        WindowUsage {
            kind: window.kind,
            used: window.used(now),
            in_flight,
            limit: window.limit,
            headroom_ratio: self.headroom_ratio(window, now, in_flight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RateController {
        RateController::new(&RateLimiterConfig::default())
    }

    #[test]
    fn effective_limit_holds_back_buffer() {
        let ctl = controller();
        // 10% of 10 = 1, so 9 usable
        assert_eq!(ctl.effective_limit(10), 9);
        // ceil(10% of 95) = 10, so 85 usable
        assert_eq!(ctl.effective_limit(95), 85);
        assert_eq!(ctl.effective_limit(0), 0);
    }

    #[test]
    fn in_flight_reservations_count_against_headroom() {
        let ctl = controller();
        let mut window = UsageWindow::new(WindowKind::PerMinute, 10);
        let now = Utc::now();

        assert!(ctl.fits(&mut window, now, 0, 1));
        for _ in 0..8 {
            window.record(now, 1);
        }
        // 8 used + 1 in flight = 9 committed; effective limit is 9
        assert!(!ctl.fits(&mut window, now, 1, 1));
        assert!(ctl.fits(&mut window, now, 0, 1));
    }

    #[test]
    fn usage_ages_out_of_the_window() {
        let ctl = controller();
        let mut window = UsageWindow::new(WindowKind::PerMinute, 10);
        let now = Utc::now();
        let stale = now - ChronoDuration::seconds(61);

        window.record(stale, 1);
        window.record(now, 1);
        assert_eq!(window.used(now), 1);
        assert!(ctl.fits(&mut window, now, 0, 1));
    }

    #[test]
    fn fast_burn_projects_exhaustion() {
        let ctl = controller();
        let mut window = UsageWindow::new(WindowKind::PerMinute, 100);
        let now = Utc::now();

        // 30 requests inside the trailing sample: burn rate 2/s, and the
        // oldest event will not age out for nearly a minute, so projected
        // usage far exceeds the buffered limit of 90.
        for _ in 0..30 {
            window.record(now, 1);
        }
        assert!(ctl.projects_exhaustion(&mut window, now));
        assert!(ctl.projected_exhaustion_at(&mut window, now).is_some());
    }

    #[test]
    fn slow_burn_does_not_project_exhaustion() {
        let ctl = controller();
        let mut window = UsageWindow::new(WindowKind::PerMinute, 100);
        let now = Utc::now();

        // Three requests spread outside the burn sample: rate is zero.
        for age in [50, 40, 30] {
            window.record(now - ChronoDuration::seconds(age), 1);
        }
        assert!(!ctl.projects_exhaustion(&mut window, now));
        assert!(ctl.projected_exhaustion_at(&mut window, now).is_none());
    }

    #[test]
    fn error_rate_needs_minimum_samples() {
        let ctl = controller();
        let mut errors = ErrorWindow::default();
        let now = Utc::now();

        for _ in 0..4 {
            ctl.record_health_sample(&mut errors, now, true);
        }
        assert_eq!(ctl.error_rate(&errors, now), None);
        assert!(!ctl.error_rate_excessive(&errors, now));

        ctl.record_health_sample(&mut errors, now, true);
        assert_eq!(ctl.error_rate(&errors, now), Some(1.0));
        assert!(ctl.error_rate_excessive(&errors, now));
    }

    #[test]
    fn error_rate_below_threshold_is_healthy() {
        let ctl = controller();
        let mut errors = ErrorWindow::default();
        let now = Utc::now();

        for i in 0..10 {
            ctl.record_health_sample(&mut errors, now, i % 4 == 0);
        }
        let rate = ctl.error_rate(&errors, now).unwrap();
        assert!(rate < 0.5);
        assert!(!ctl.error_rate_excessive(&errors, now));
    }
}
