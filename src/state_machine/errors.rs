use super::states::WorkflowState;
use thiserror::Error;

/// Errors raised by the workflow state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    /// The (state, event) pair is not in the transition table. The state is
    /// left unchanged.
    #[error("invalid transition: {event} from {from}")]
    InvalidTransition { from: WorkflowState, event: String },
}

pub type StateMachineResult<T> = std::result::Result<T, StateMachineError>;
