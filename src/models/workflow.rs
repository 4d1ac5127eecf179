//! Workflow and step records.
//!
//! A workflow is one end-to-end execution instance of a methodology: an
//! ordered list of steps, each naming a required capability and an ordered
//! list of provider candidates for failover. Workflows become immutable once
//! terminal; results of completed steps are retained even when a later step
//! fails.

use super::provider::{Capability, ProviderId};
use crate::state_machine::states::{StepState, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Template for one step, as submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub capability: Capability,
    /// Failover order; the executor walks these left to right.
    pub provider_candidates: Vec<ProviderId>,
    pub max_retries: Option<u32>,
    /// Opaque payload handed to the service adapter.
    pub payload: Value,
}

impl StepSpec {
    pub fn new(capability: Capability, provider_candidates: Vec<ProviderId>) -> Self {
        Self {
            capability,
            provider_candidates,
            max_retries: None,
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Submitted workflow specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub methodology: String,
    pub steps: Vec<StepSpec>,
    /// Higher runs earlier; default 0.
    pub priority: i32,
    pub parameters: Value,
}

impl WorkflowSpec {
    pub fn new(methodology: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            methodology: methodology.into(),
            steps,
            priority: 0,
            parameters: Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// One step of a running workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub index: usize,
    pub capability: Capability,
    pub provider_candidates: Vec<ProviderId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: StepState,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl WorkflowStep {
    fn from_spec(index: usize, spec: StepSpec, default_max_retries: u32) -> Self {
        Self {
            index,
            capability: spec.capability,
            provider_candidates: spec.provider_candidates,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            status: StepState::Pending,
            payload: spec.payload,
            result: None,
            error: None,
        }
    }
}

/// One end-to-end execution instance of a methodology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub methodology: String,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowState,
    pub priority: i32,
    pub parameters: Value,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Workflow {
    pub fn from_spec(spec: WorkflowSpec, default_max_retries: u32) -> Self {
        let steps = spec
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| WorkflowStep::from_spec(i, s, default_max_retries))
            .collect();
        Self {
            id: Uuid::new_v4(),
            methodology: spec.methodology,
            steps,
            status: WorkflowState::Created,
            priority: spec.priority,
            parameters: spec.parameters,
            created_at: Utc::now(),
            submitted_at: None,
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Index of the next step that has not reached a terminal status.
    pub fn next_pending_step(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| matches!(s.status, StepState::Pending | StepState::Running))
    }

    /// Index of the currently running step, if any.
    pub fn current_step(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Aggregated results, available only once Completed.
    pub fn results(&self) -> Option<Value> {
        if self.status != WorkflowState::Completed {
            return None;
        }
        Some(Value::Array(
            self.steps
                .iter()
                .map(|s| s.result.clone().unwrap_or(Value::Null))
                .collect(),
        ))
    }

    /// Results of every step that succeeded so far, regardless of overall
    /// workflow status. Preserved across later failures.
    pub fn partial_results(&self) -> Vec<(usize, Value)> {
        self.steps
            .iter()
            .filter(|s| s.status == StepState::Succeeded)
            .filter_map(|s| s.result.clone().map(|r| (s.index, r)))
            .collect()
    }
}

/// Status view returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub workflow_id: WorkflowId,
    pub status: WorkflowState,
    pub current_step: Option<usize>,
    pub total_steps: usize,
    pub error: Option<String>,
}
