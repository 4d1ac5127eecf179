//! # Configuration System
//!
//! Typed, validated configuration for the orchestration core. Defaults live
//! in [`crate::constants`]; an optional file layer and `RESEARCH_CORE_`
//! prefixed environment variables override them. No silent fallbacks: a
//! value that fails validation rejects the whole load.
//!
//! ## Usage
//!
//! ```rust
//! use research_core::config::CoreConfig;
//!
//! let config = CoreConfig::default();
//! assert!((config.rate_limiter.buffer_fraction - 0.10).abs() < f64::EPSILON);
//! ```

pub mod error;
pub mod loader;

use crate::constants;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::load as load_config;

/// Root configuration for the orchestration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub execution: ExecutionConfig,
}

/// Scheduler and admission queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bound on concurrently running workflows.
    pub max_concurrent_workflows: usize,
    /// Bound on workflows waiting for admission.
    pub max_queue_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: constants::DEFAULT_MAX_CONCURRENT_WORKFLOWS,
            max_queue_depth: constants::DEFAULT_MAX_QUEUE_DEPTH,
        }
    }
}

/// Predictive rate controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Fraction of each quota window held back as headroom buffer.
    pub buffer_fraction: f64,
    /// Trailing interval used to estimate burn rate.
    pub burn_sample_seconds: u64,
    /// Rolling window for per-credential failure tracking.
    pub error_rate_window_seconds: u64,
    /// Failure ratio above which a credential becomes AtRisk.
    pub error_rate_threshold: f64,
    /// Minimum observations before the error-rate threshold applies.
    pub error_rate_min_samples: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            buffer_fraction: constants::DEFAULT_BUFFER_FRACTION,
            burn_sample_seconds: constants::DEFAULT_BURN_SAMPLE_SECONDS,
            error_rate_window_seconds: constants::DEFAULT_ERROR_RATE_WINDOW_SECONDS,
            error_rate_threshold: constants::DEFAULT_ERROR_RATE_THRESHOLD,
            error_rate_min_samples: constants::DEFAULT_ERROR_RATE_MIN_SAMPLES,
        }
    }
}

impl RateLimiterConfig {
    pub fn burn_sample(&self) -> Duration {
        Duration::from_secs(self.burn_sample_seconds)
    }

    pub fn error_rate_window(&self) -> Duration {
        Duration::from_secs(self.error_rate_window_seconds)
    }
}

/// Step execution and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Mandatory per-step call timeout in milliseconds.
    pub step_timeout_ms: u64,
    /// Base delay for exponential retry backoff in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Cap on any single retry delay in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Whether retry delays are jittered.
    pub jitter: bool,
    /// Retry budget applied to steps that do not specify their own.
    pub default_max_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: constants::DEFAULT_STEP_TIMEOUT_MS,
            retry_base_delay_ms: constants::DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: constants::DEFAULT_RETRY_MAX_DELAY_MS,
            backoff_multiplier: constants::DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
            default_max_retries: constants::DEFAULT_MAX_RETRIES,
        }
    }
}

impl ExecutionConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl CoreConfig {
    /// Validate cross-field constraints after deserialization.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..1.0).contains(&self.rate_limiter.buffer_fraction) {
            return Err(ConfigurationError::validation(
                "rate_limiter.buffer_fraction",
                "must be in [0, 1)",
            ));
        }
        if !(0.0..=1.0).contains(&self.rate_limiter.error_rate_threshold) {
            return Err(ConfigurationError::validation(
                "rate_limiter.error_rate_threshold",
                "must be in [0, 1]",
            ));
        }
        if self.rate_limiter.burn_sample_seconds == 0 {
            return Err(ConfigurationError::validation(
                "rate_limiter.burn_sample_seconds",
                "must be positive",
            ));
        }
        if self.scheduler.max_concurrent_workflows == 0 {
            return Err(ConfigurationError::validation(
                "scheduler.max_concurrent_workflows",
                "must be at least 1",
            ));
        }
        if self.scheduler.max_queue_depth == 0 {
            return Err(ConfigurationError::validation(
                "scheduler.max_queue_depth",
                "must be at least 1",
            ));
        }
        if self.execution.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::validation(
                "execution.backoff_multiplier",
                "must be >= 1.0",
            ));
        }
        if self.execution.step_timeout_ms == 0 {
            return Err(ConfigurationError::validation(
                "execution.step_timeout_ms",
                "timeouts are mandatory; must be positive",
            ));
        }
        if self.execution.retry_base_delay_ms > self.execution.retry_max_delay_ms {
            return Err(ConfigurationError::validation(
                "execution.retry_base_delay_ms",
                "base delay exceeds retry_max_delay_ms",
            ));
        }
        Ok(())
    }
}
