//! Configuration loader.
//!
//! Layered loading: in-code defaults, then an optional TOML/YAML file, then
//! `RESEARCH_CORE_` environment variables (double underscore as section
//! separator, e.g. `RESEARCH_CORE_SCHEDULER__MAX_CONCURRENT_WORKFLOWS=5`).

use super::error::ConfigResult;
use super::CoreConfig;
use config::{Config, Environment, File};
use std::path::Path;
use tracing::debug;

const ENV_PREFIX: &str = "RESEARCH_CORE";

/// Load configuration from defaults and environment overrides only.
pub fn load() -> ConfigResult<CoreConfig> {
    load_inner(None)
}

/// Load configuration with an explicit file layer between defaults and
/// environment overrides.
pub fn load_from_file(path: &Path) -> ConfigResult<CoreConfig> {
    load_inner(Some(path))
}

fn load_inner(path: Option<&Path>) -> ConfigResult<CoreConfig> {
    let defaults = Config::try_from(&CoreConfig::default())?;

    let mut builder = Config::builder().add_source(defaults);
    if let Some(path) = path {
        debug!(path = %path.display(), "layering configuration file");
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let config: CoreConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    debug!(
        max_concurrent = config.scheduler.max_concurrent_workflows,
        buffer_fraction = config.rate_limiter.buffer_fraction,
        "configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_file_uses_defaults() {
        let config = load().expect("defaults should load");
        assert_eq!(
            config.scheduler.max_concurrent_workflows,
            crate::constants::DEFAULT_MAX_CONCURRENT_WORKFLOWS
        );
    }
}
