//! Per-workflow runner task.
//!
//! One task per admitted workflow. Steps run strictly in order; each step's
//! result is recorded before the next starts, so a later failure never
//! discards earlier results. Control signals are honored at step
//! boundaries, and the runner always frees its slot and wakes the admission
//! loop on exit.

use super::scheduler::SchedulerShared;
use super::step_executor::StepOutcome;
use super::ControlSignal;
use crate::error::CoreError;
use crate::models::workflow::{WorkflowId, WorkflowStep};
use crate::state_machine::{StepState, WorkflowEvent, WorkflowStateMachine};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

enum Boundary {
    /// Execute this step next.
    Step(WorkflowStep),
    /// A pause landed with work still remaining.
    PauseRequested,
    /// No pending steps remain.
    AllStepsDone,
    /// Workflow record disappeared (removed during execution).
    Gone,
}

pub(crate) async fn run_workflow(
    shared: Arc<SchedulerShared>,
    id: WorkflowId,
    mut control: watch::Receiver<ControlSignal>,
) {
    loop {
        // Copy the signal out: the watch guard is not Send, so it must not
        // live across an await point.
        let signal = *control.borrow();
        if signal == ControlSignal::Cancel {
            finalize(&shared, id, WorkflowEvent::Cancel).await;
            return;
        }

        let boundary = {
            match shared.workflows.get_mut(&id) {
                None => Boundary::Gone,
                Some(mut workflow) => match workflow.next_pending_step() {
                    None => Boundary::AllStepsDone,
                    // A pause with nothing left to run would strand the
                    // workflow in the queue; completion wins.
                    Some(_) if signal == ControlSignal::Pause => Boundary::PauseRequested,
                    Some(index) => {
                        workflow.steps[index].status = StepState::Running;
                        Boundary::Step(workflow.steps[index].clone())
                    }
                },
            }
        };

        let step = match boundary {
            Boundary::Step(step) => step,
            Boundary::PauseRequested => {
                finalize(&shared, id, WorkflowEvent::Pause).await;
                return;
            }
            Boundary::AllStepsDone => {
                finalize(&shared, id, WorkflowEvent::Complete).await;
                return;
            }
            Boundary::Gone => {
                release_slot(&shared, id);
                return;
            }
        };

        debug!(
            workflow_id = %id,
            step_index = step.index,
            capability = %step.capability,
            "step started"
        );
        let run = shared.executor.execute(&step, &mut control).await;

        let terminal_event = {
            let Some(mut workflow) = shared.workflows.get_mut(&id) else {
                release_slot(&shared, id);
                return;
            };
            let record = &mut workflow.steps[step.index];
            record.retry_count = run.retries;
            match run.outcome {
                StepOutcome::Succeeded(value) => {
                    record.status = StepState::Succeeded;
                    record.result = Some(value);
                    record.error = None;
                    if let Err(err) =
                        WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::StepSucceeded)
                    {
                        warn!(workflow_id = %id, error = %err, "step advance rejected");
                    }
                    None
                }
                StepOutcome::Failed { error } => {
                    record.status = StepState::Failed;
                    record.error = Some(error.clone());
                    let failure = CoreError::StepFailed {
                        step_index: step.index,
                        last_error: error,
                    };
                    Some(WorkflowEvent::fail_with_error(failure.to_string()))
                }
                StepOutcome::Cancelled => {
                    // Revert to pending so the cancel transition marks it
                    // skipped along with the steps that never ran.
                    record.status = StepState::Pending;
                    Some(WorkflowEvent::Cancel)
                }
            }
        };

        if let Some(event) = terminal_event {
            finalize(&shared, id, event).await;
            return;
        }
    }
}

/// Apply a terminal or pausing event, persist the workflow, and free the
/// running slot.
async fn finalize(shared: &Arc<SchedulerShared>, id: WorkflowId, event: WorkflowEvent) {
    let snapshot = {
        match shared.workflows.get_mut(&id) {
            None => None,
            Some(mut workflow) => {
                match WorkflowStateMachine::apply(&mut workflow, event.clone()) {
                    Ok(state) => {
                        info!(workflow_id = %id, state = %state, "workflow finalized");
                    }
                    Err(err) => {
                        warn!(workflow_id = %id, error = %err, "finalize transition rejected");
                    }
                }
                Some(workflow.clone())
            }
        }
    };

    {
        let mut stats = shared.stats.lock();
        match event {
            WorkflowEvent::Complete => stats.completed += 1,
            WorkflowEvent::Fail(_) => stats.failed += 1,
            WorkflowEvent::Cancel => stats.cancelled += 1,
            _ => {}
        }
    }

    if let Some(snapshot) = snapshot {
        if let Err(err) = shared.store.save_workflow(&snapshot).await {
            warn!(workflow_id = %id, error = %err, "failed to persist workflow");
        }
    }
    release_slot(shared, id);
}

fn release_slot(shared: &Arc<SchedulerShared>, id: WorkflowId) {
    shared.running.remove(&id);
    shared.wake.notify_waiters();
}
