//! Research methodology catalog.
//!
//! A methodology is a named, ordered recipe of step templates. Resolving one
//! against caller parameters yields a concrete [`WorkflowSpec`] ready for
//! submission. Built-ins mirror the provider chains the research flows are
//! written against; callers can register their own.

use crate::error::{CoreError, Result};
use crate::models::provider::{Capability, ProviderId};
use crate::models::workflow::{StepSpec, WorkflowSpec};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// One templated step of a methodology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    pub capability: Capability,
    /// Failover order for this step.
    pub provider_candidates: Vec<ProviderId>,
    pub max_retries: Option<u32>,
}

impl StepTemplate {
    pub fn new(capability: Capability, provider_candidates: Vec<ProviderId>) -> Self {
        Self {
            capability,
            provider_candidates,
            max_retries: None,
        }
    }
}

/// A named research recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Methodology {
    pub name: String,
    pub description: String,
    pub steps: Vec<StepTemplate>,
}

impl Methodology {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<StepTemplate>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps,
        }
    }

    /// API-first chain: search, embed the hits, then synthesize.
    pub fn cost_optimized() -> Self {
        Self::new(
            "cost_optimized",
            "search via serpapi, embed with jina, synthesize with openrouter",
            vec![
                StepTemplate::new(Capability::Search, vec![ProviderId::new("serpapi")]),
                StepTemplate::new(Capability::Embed, vec![ProviderId::new("jina")]),
                StepTemplate::new(Capability::Complete, vec![ProviderId::new("openrouter")]),
            ],
        )
    }

    /// Crawl-first chain for sources that need full page extraction.
    pub fn scrape_first() -> Self {
        Self::new(
            "scrape_first",
            "scrape with firecrawl, synthesize with openrouter",
            vec![
                StepTemplate::new(Capability::Scrape, vec![ProviderId::new("firecrawl")]),
                StepTemplate::new(Capability::Complete, vec![ProviderId::new("openrouter")]),
            ],
        )
    }

    /// Search plus scrape with cross-provider failover on the scrape step.
    pub fn hybrid() -> Self {
        Self::new(
            "hybrid",
            "search via serpapi, scrape with firecrawl falling back to jina, synthesize",
            vec![
                StepTemplate::new(Capability::Search, vec![ProviderId::new("serpapi")]),
                StepTemplate::new(
                    Capability::Scrape,
                    vec![ProviderId::new("firecrawl"), ProviderId::new("jina")],
                ),
                StepTemplate::new(Capability::Complete, vec![ProviderId::new("openrouter")]),
            ],
        )
    }
}

/// Thread-safe methodology lookup.
pub struct MethodologyRegistry {
    methodologies: RwLock<HashMap<String, Methodology>>,
}

impl MethodologyRegistry {
    pub fn empty() -> Self {
        Self {
            methodologies: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-seeded with the built-in recipes.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        for methodology in [
            Methodology::cost_optimized(),
            Methodology::scrape_first(),
            Methodology::hybrid(),
        ] {
            // Built-ins are well formed.
            let _ = registry.register(methodology);
        }
        registry
    }

    pub fn register(&self, methodology: Methodology) -> Result<()> {
        if methodology.name.is_empty() {
            return Err(CoreError::InvalidWorkflowSpec(
                "methodology name must not be empty".to_string(),
            ));
        }
        if methodology.steps.is_empty() {
            return Err(CoreError::InvalidWorkflowSpec(format!(
                "methodology {} has no steps",
                methodology.name
            )));
        }
        for (index, step) in methodology.steps.iter().enumerate() {
            if step.provider_candidates.is_empty() {
                return Err(CoreError::InvalidWorkflowSpec(format!(
                    "methodology {} step {index} has no provider candidates",
                    methodology.name
                )));
            }
        }
        debug!(methodology = %methodology.name, steps = methodology.steps.len(), "methodology registered");
        self.methodologies
            .write()
            .insert(methodology.name.clone(), methodology);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.methodologies.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a methodology into a submittable workflow spec. The
    /// caller's parameters become each step's payload.
    pub fn resolve(&self, name: &str, parameters: Value, priority: i32) -> Result<WorkflowSpec> {
        let methodologies = self.methodologies.read();
        let methodology = methodologies.get(name).ok_or_else(|| {
            CoreError::InvalidWorkflowSpec(format!("unknown methodology: {name}"))
        })?;

        let steps = methodology
            .steps
            .iter()
            .map(|template| {
                let mut step = StepSpec::new(
                    template.capability,
                    template.provider_candidates.clone(),
                )
                .with_payload(parameters.clone());
                step.max_retries = template.max_retries;
                step
            })
            .collect();

        Ok(WorkflowSpec::new(name, steps)
            .with_priority(priority)
            .with_parameters(parameters))
    }

    /// Validate a caller-assembled spec the same way registered
    /// methodologies are validated.
    pub fn validate_spec(spec: &WorkflowSpec) -> Result<()> {
        if spec.steps.is_empty() {
            return Err(CoreError::InvalidWorkflowSpec(
                "workflow has no steps".to_string(),
            ));
        }
        for (index, step) in spec.steps.iter().enumerate() {
            if step.provider_candidates.is_empty() {
                return Err(CoreError::InvalidWorkflowSpec(format!(
                    "step {index} has no provider candidates"
                )));
            }
        }
        Ok(())
    }
}
