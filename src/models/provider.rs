//! Provider descriptors.
//!
//! A provider is an external service reachable through one
//! [`crate::adapter::ServiceAdapter`]. The core only knows its identifier,
//! the capabilities it offers, and its default backoff/timeout policy —
//! never its wire format.

use crate::constants;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Abstract operation a provider can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Search,
    Scrape,
    Embed,
    Complete,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Scrape => write!(f, "scrape"),
            Self::Embed => write!(f, "embed"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(Self::Search),
            "scrape" => Ok(Self::Scrape),
            "embed" => Ok(Self::Embed),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid capability: {s}")),
        }
    }
}

/// Provider identifier (e.g. "serpapi", "openrouter").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A registered external service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub capabilities: HashSet<Capability>,
    /// Backoff applied to a credential when this provider explicitly signals
    /// a quota violation without a retry-after hint.
    pub rate_limit_backoff_ms: u64,
    /// Default per-call timeout for this provider.
    pub call_timeout_ms: u64,
}

impl Provider {
    pub fn new(id: impl Into<ProviderId>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().collect(),
            rate_limit_backoff_ms: constants::DEFAULT_PROVIDER_BACKOFF_MS,
            call_timeout_ms: constants::DEFAULT_STEP_TIMEOUT_MS,
        }
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Built-in provider catalog mirroring the services the research
/// methodologies are written against. Only shapes and policies, no URLs.
impl Provider {
    pub fn openrouter() -> Self {
        Self::new("openrouter", [Capability::Complete])
            .with_call_timeout(Duration::from_secs(30))
    }

    pub fn serpapi() -> Self {
        Self::new("serpapi", [Capability::Search]).with_call_timeout(Duration::from_secs(15))
    }

    pub fn jina() -> Self {
        Self::new("jina", [Capability::Scrape, Capability::Embed])
            .with_call_timeout(Duration::from_secs(20))
    }

    pub fn firecrawl() -> Self {
        Self::new("firecrawl", [Capability::Scrape])
            .with_call_timeout(Duration::from_secs(60))
    }

    pub fn builtin_catalog() -> Vec<Self> {
        vec![
            Self::openrouter(),
            Self::serpapi(),
            Self::jina(),
            Self::firecrawl(),
        ]
    }
}
