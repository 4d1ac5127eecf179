//! Structured logging initialization.
//!
//! Thin wrapper around `tracing-subscriber` with an environment filter and
//! an optional JSON layer for machine-readable output. Safe to call more
//! than once; safe to call when an embedding application already installed
//! a global subscriber.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging, honoring `RUST_LOG`.
pub fn init_logging() {
    init_with_format(false);
}

/// Initialize logging with either human-readable or JSON output.
pub fn init_with_format(json: bool) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed, reusing it");
        }
    });
}
