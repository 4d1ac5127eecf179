//! System-wide defaults.
//!
//! Every value here can be overridden through [`crate::config::CoreConfig`];
//! these are the fallbacks used when no configuration file or environment
//! override is present.

/// Fraction of each quota window held back as a safety buffer. A credential
/// is only eligible for a lease while its projected usage stays below
/// `limit * (1 - buffer)`.
pub const DEFAULT_BUFFER_FRACTION: f64 = 0.10;

/// Trailing interval used to estimate the current burn rate for predictive
/// exhaustion marking.
pub const DEFAULT_BURN_SAMPLE_SECONDS: u64 = 15;

/// Rolling window over which per-credential call failures are tracked.
pub const DEFAULT_ERROR_RATE_WINDOW_SECONDS: u64 = 60;

/// Failure ratio above which a credential is deprioritized as AtRisk.
pub const DEFAULT_ERROR_RATE_THRESHOLD: f64 = 0.5;

/// Minimum number of observations before the error-rate threshold applies.
pub const DEFAULT_ERROR_RATE_MIN_SAMPLES: usize = 5;

/// Backoff applied to a credential when a provider explicitly signals that
/// its quota is exceeded and no retry-after hint is available.
pub const DEFAULT_PROVIDER_BACKOFF_MS: u64 = 60_000;

/// Maximum number of workflows executing concurrently.
pub const DEFAULT_MAX_CONCURRENT_WORKFLOWS: usize = 3;

/// Maximum number of workflows waiting for admission before submissions are
/// rejected outright.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1_024;

/// Default retry budget for a workflow step.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential retry backoff.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Cap on any single retry delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Exponential backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Mandatory per-step call timeout.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Number of operator alerts retained in memory.
pub const ALERT_HISTORY_LIMIT: usize = 1_000;
