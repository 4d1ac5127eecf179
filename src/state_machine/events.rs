use serde::{Deserialize, Serialize};

/// Events that can trigger workflow state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkflowEvent {
    /// Submit to the scheduler's admission queue
    Submit,
    /// Scheduler admits the workflow into a running slot
    Admit,
    /// The current step succeeded; advance to the next one
    StepSucceeded,
    /// Explicit pause request; takes effect at the next step boundary
    Pause,
    /// Resume a paused workflow (re-enters the admission queue)
    Resume,
    /// Explicit cancellation
    Cancel,
    /// A required step exhausted retries/failover
    Fail(String),
    /// Final step succeeded
    Complete,
}

impl WorkflowEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Admit => "admit",
            Self::StepSucceeded => "step_succeeded",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Fail(_) => "fail",
            Self::Complete => "complete",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancel | Self::Fail(_) | Self::Complete)
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
