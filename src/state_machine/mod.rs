// Workflow lifecycle state machine.
//
// Transition table per the workflow lifecycle design: illegal transitions
// are rejected with an error, never silently ignored.

pub mod errors;
pub mod events;
pub mod states;
pub mod workflow_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::WorkflowEvent;
pub use states::{StepState, WorkflowState};
pub use workflow_state_machine::WorkflowStateMachine;
