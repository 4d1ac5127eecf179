//! Workflow state machine.
//!
//! The transition table is a pure function; [`WorkflowStateMachine::apply`]
//! additionally stamps timestamps and the last error onto the workflow
//! record. Illegal transitions error out and leave the record untouched.

use super::errors::{StateMachineError, StateMachineResult};
use super::events::WorkflowEvent;
use super::states::{StepState, WorkflowState};
use crate::models::workflow::Workflow;
use chrono::Utc;
use tracing::debug;

pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    /// Determine the target state for an event, without side effects.
    pub fn determine_target_state(
        current: WorkflowState,
        event: &WorkflowEvent,
    ) -> StateMachineResult<WorkflowState> {
        use WorkflowEvent as E;
        use WorkflowState as S;

        let target = match (current, event) {
            (S::Created, E::Submit) => S::Queued,
            (S::Queued, E::Admit) => S::Running,

            // Advancing to the next step after a step succeeds
            (S::Running, E::StepSucceeded) => S::Running,

            (S::Running, E::Pause) => S::Paused,
            (S::Paused, E::Resume) => S::Queued,

            (S::Running, E::Cancel) => S::Cancelled,
            (S::Queued, E::Cancel) => S::Cancelled,
            (S::Paused, E::Cancel) => S::Cancelled,

            (S::Running, E::Fail(_)) => S::Failed,
            (S::Running, E::Complete) => S::Completed,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event to a workflow record, updating status, timestamps and
    /// last error. Returns the new state.
    pub fn apply(workflow: &mut Workflow, event: WorkflowEvent) -> StateMachineResult<WorkflowState> {
        let target = Self::determine_target_state(workflow.status, &event)?;

        debug!(
            workflow_id = %workflow.id,
            from = %workflow.status,
            to = %target,
            event = event.event_type(),
            "workflow transition"
        );

        match &event {
            WorkflowEvent::Submit => workflow.submitted_at = Some(Utc::now()),
            WorkflowEvent::Admit => {
                if workflow.started_at.is_none() {
                    workflow.started_at = Some(Utc::now());
                }
            }
            WorkflowEvent::Fail(reason) => {
                workflow.last_error = Some(reason.clone());
                workflow.completed_at = Some(Utc::now());
            }
            WorkflowEvent::Complete => {
                workflow.completed_at = Some(Utc::now());
            }
            WorkflowEvent::Cancel => {
                workflow.completed_at = Some(Utc::now());
                // Steps that never got to run are skipped, not failed.
                for step in &mut workflow.steps {
                    if step.status == StepState::Pending {
                        step.status = StepState::Skipped;
                    }
                }
            }
            WorkflowEvent::StepSucceeded | WorkflowEvent::Pause | WorkflowEvent::Resume => {}
        }

        workflow.status = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::provider::{Capability, ProviderId};
    use crate::models::workflow::{StepSpec, WorkflowSpec};
    use proptest::prelude::*;

    fn make_workflow() -> Workflow {
        Workflow::from_spec(
            WorkflowSpec::new(
                "test",
                vec![StepSpec::new(
                    Capability::Search,
                    vec![ProviderId::new("serpapi")],
                )],
            ),
            3,
        )
    }

    #[test]
    fn happy_path_transitions() {
        use WorkflowEvent as E;
        use WorkflowState as S;

        assert_eq!(
            WorkflowStateMachine::determine_target_state(S::Created, &E::Submit).unwrap(),
            S::Queued
        );
        assert_eq!(
            WorkflowStateMachine::determine_target_state(S::Queued, &E::Admit).unwrap(),
            S::Running
        );
        assert_eq!(
            WorkflowStateMachine::determine_target_state(S::Running, &E::StepSucceeded).unwrap(),
            S::Running
        );
        assert_eq!(
            WorkflowStateMachine::determine_target_state(S::Running, &E::Complete).unwrap(),
            S::Completed
        );
    }

    #[test]
    fn pause_resume_cycle() {
        use WorkflowEvent as E;
        use WorkflowState as S;

        assert_eq!(
            WorkflowStateMachine::determine_target_state(S::Running, &E::Pause).unwrap(),
            S::Paused
        );
        // Resume re-enters the queue rather than running instantly
        assert_eq!(
            WorkflowStateMachine::determine_target_state(S::Paused, &E::Resume).unwrap(),
            S::Queued
        );
    }

    #[test]
    fn cancel_from_every_non_terminal_execution_state() {
        use WorkflowEvent as E;
        use WorkflowState as S;

        for state in [S::Running, S::Queued, S::Paused] {
            assert_eq!(
                WorkflowStateMachine::determine_target_state(state, &E::Cancel).unwrap(),
                S::Cancelled
            );
        }
        // Created has not been submitted; cancel is not in the table
        assert!(WorkflowStateMachine::determine_target_state(S::Created, &E::Cancel).is_err());
    }

    #[test]
    fn terminal_states_reject_everything() {
        use WorkflowEvent as E;
        use WorkflowState as S;

        for state in [S::Completed, S::Failed, S::Cancelled] {
            for event in [
                E::Submit,
                E::Admit,
                E::StepSucceeded,
                E::Pause,
                E::Resume,
                E::Cancel,
                E::Fail("boom".into()),
                E::Complete,
            ] {
                assert!(
                    WorkflowStateMachine::determine_target_state(state, &event).is_err(),
                    "{state} should reject {}",
                    event.event_type()
                );
            }
        }
    }

    #[test]
    fn illegal_transition_leaves_workflow_unchanged() {
        let mut workflow = make_workflow();
        let before = workflow.status;
        let err = WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Complete).unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidTransition { .. }));
        assert_eq!(workflow.status, before);
        assert!(workflow.completed_at.is_none());
    }

    #[test]
    fn cancel_skips_steps_that_never_ran() {
        let mut workflow = make_workflow();
        WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Submit).unwrap();
        WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Cancel).unwrap();
        assert_eq!(workflow.status, WorkflowState::Cancelled);
        assert!(workflow
            .steps
            .iter()
            .all(|s| s.status == StepState::Skipped));
    }

    #[test]
    fn fail_records_last_error() {
        let mut workflow = make_workflow();
        WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Submit).unwrap();
        WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Admit).unwrap();
        WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::fail_with_error("adapter down"))
            .unwrap();
        assert_eq!(workflow.status, WorkflowState::Failed);
        assert_eq!(workflow.last_error.as_deref(), Some("adapter down"));
        assert!(workflow.completed_at.is_some());
    }

    fn arb_state() -> impl Strategy<Value = WorkflowState> {
        use WorkflowState as S;
        prop_oneof![
            Just(S::Created),
            Just(S::Queued),
            Just(S::Running),
            Just(S::Paused),
            Just(S::Cancelled),
            Just(S::Completed),
            Just(S::Failed),
        ]
    }

    fn arb_event() -> impl Strategy<Value = WorkflowEvent> {
        use WorkflowEvent as E;
        prop_oneof![
            Just(E::Submit),
            Just(E::Admit),
            Just(E::StepSucceeded),
            Just(E::Pause),
            Just(E::Resume),
            Just(E::Cancel),
            Just(E::Fail("err".into())),
            Just(E::Complete),
        ]
    }

    fn in_table(state: WorkflowState, event: &WorkflowEvent) -> bool {
        use WorkflowEvent as E;
        use WorkflowState as S;
        matches!(
            (state, event),
            (S::Created, E::Submit)
                | (S::Queued, E::Admit)
                | (S::Running, E::StepSucceeded)
                | (S::Running, E::Pause)
                | (S::Paused, E::Resume)
                | (S::Running | S::Queued | S::Paused, E::Cancel)
                | (S::Running, E::Fail(_))
                | (S::Running, E::Complete)
        )
    }

    proptest! {
        // Any (state, event) pair outside the table must error; any pair in
        // the table must succeed.
        #[test]
        fn transition_table_is_exhaustive(state in arb_state(), event in arb_event()) {
            let result = WorkflowStateMachine::determine_target_state(state, &event);
            prop_assert_eq!(result.is_ok(), in_table(state, &event));
        }
    }
}
