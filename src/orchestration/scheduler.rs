//! Workflow scheduler and admission queue.
//!
//! Submitted workflows wait in a priority queue (higher priority first,
//! FIFO within a priority). A single admission loop moves them into running
//! slots whenever one is free AND some credential could serve the
//! workflow's next step; it is wake-driven, triggered by submissions,
//! completions, and credential releases rather than polling.

use super::step_executor::StepExecutor;
use super::workflow_runner::run_workflow;
use super::ControlSignal;
use crate::config::SchedulerConfig;
use crate::credentials::CredentialRegistry;
use crate::error::{CoreError, Result};
use crate::models::workflow::{Workflow, WorkflowId, WorkflowSpec, WorkflowStatusView};
use crate::state_machine::{StateMachineError, WorkflowEvent, WorkflowState, WorkflowStateMachine};
use crate::storage::RecordStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One waiting workflow.
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub workflow_id: WorkflowId,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub admitted: u64,
    pub total_wait_ms: u128,
}

/// Point-in-time queue health, as returned by `queue_statistics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Mean time from enqueue to admission, over all admitted workflows.
    pub average_wait_ms: f64,
}

/// State shared between the scheduler handle, the admission loop, and the
/// per-workflow runner tasks.
pub(crate) struct SchedulerShared {
    pub(crate) workflows: DashMap<WorkflowId, Workflow>,
    pub(crate) queue: Mutex<Vec<QueueEntry>>,
    pub(crate) running: DashMap<WorkflowId, watch::Sender<ControlSignal>>,
    pub(crate) stats: Mutex<SchedulerStats>,
    pub(crate) executor: StepExecutor,
    pub(crate) registry: Arc<CredentialRegistry>,
    pub(crate) store: Arc<dyn RecordStore>,
    /// Woken on submissions, resumes, and runner exits.
    pub(crate) wake: Notify,
    pub(crate) max_concurrent: usize,
    pub(crate) max_queue_depth: usize,
}

pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    shutdown: watch::Sender<bool>,
    admission: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build the scheduler and spawn its admission loop.
    pub fn start(
        config: &SchedulerConfig,
        executor: StepExecutor,
        registry: Arc<CredentialRegistry>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let shared = Arc::new(SchedulerShared {
            workflows: DashMap::new(),
            queue: Mutex::new(Vec::new()),
            running: DashMap::new(),
            stats: Mutex::new(SchedulerStats::default()),
            executor,
            registry,
            store,
            wake: Notify::new(),
            max_concurrent: config.max_concurrent_workflows,
            max_queue_depth: config.max_queue_depth,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let admission = tokio::spawn(admission_loop(Arc::clone(&shared), shutdown_rx));
        info!(
            max_concurrent = config.max_concurrent_workflows,
            "scheduler started"
        );
        Self {
            shared,
            shutdown,
            admission: Mutex::new(Some(admission)),
        }
    }

    /// Queue a workflow for execution. Returns immediately with its id.
    pub async fn submit(&self, spec: WorkflowSpec, default_max_retries: u32) -> Result<WorkflowId> {
        let mut workflow = Workflow::from_spec(spec, default_max_retries);
        WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Submit)?;
        let id = workflow.id;
        let entry = QueueEntry {
            workflow_id: id,
            priority: workflow.priority,
            enqueued_at: Utc::now(),
        };
        let snapshot = workflow.clone();
        // The record must exist before the entry: the admission loop prunes
        // entries whose workflow is missing from the map.
        self.shared.workflows.insert(id, workflow);
        if let Err(err) = self.try_push_entry(entry) {
            self.shared.workflows.remove(&id);
            return Err(err);
        }

        if let Err(err) = self.shared.store.save_workflow(&snapshot).await {
            warn!(workflow_id = %id, error = %err, "failed to persist submitted workflow");
        }
        debug!(workflow_id = %id, priority = snapshot.priority, "workflow queued");
        self.shared.wake.notify_waiters();
        Ok(id)
    }

    /// Re-insert an already-queued workflow, used by resume and recovery.
    pub(crate) fn enqueue_existing(&self, workflow: Workflow) {
        let entry = QueueEntry {
            workflow_id: workflow.id,
            priority: workflow.priority,
            enqueued_at: Utc::now(),
        };
        self.shared.workflows.insert(workflow.id, workflow);
        self.push_entry(entry);
        self.shared.wake.notify_waiters();
    }

    /// Re-insert a workflow record without queueing it, used by recovery
    /// for paused and terminal workflows.
    pub(crate) fn restore_record(&self, workflow: Workflow) {
        self.shared.workflows.insert(workflow.id, workflow);
    }

    /// Depth-checked insert for new submissions. The check and the push
    /// share one lock so concurrent submits cannot overshoot the bound.
    fn try_push_entry(&self, entry: QueueEntry) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.max_queue_depth {
            return Err(CoreError::NoCapacity);
        }
        Self::insert_sorted(&mut queue, entry);
        Ok(())
    }

    /// Unchecked insert for resume and recovery, which never reject.
    fn push_entry(&self, entry: QueueEntry) {
        Self::insert_sorted(&mut self.shared.queue.lock(), entry);
    }

    fn insert_sorted(queue: &mut Vec<QueueEntry>, entry: QueueEntry) {
        queue.push(entry);
        // Higher priority first; FIFO inside a priority level.
        queue.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });
    }

    pub fn status(&self, id: WorkflowId) -> Result<WorkflowStatusView> {
        let workflow = self
            .shared
            .workflows
            .get(&id)
            .ok_or(CoreError::WorkflowNotFound { workflow_id: id })?;
        Ok(WorkflowStatusView {
            workflow_id: id,
            status: workflow.status,
            current_step: workflow.current_step(),
            total_steps: workflow.steps.len(),
            error: workflow.last_error.clone(),
        })
    }

    pub fn workflow(&self, id: WorkflowId) -> Result<Workflow> {
        self.shared
            .workflows
            .get(&id)
            .map(|w| w.clone())
            .ok_or(CoreError::WorkflowNotFound { workflow_id: id })
    }

    /// Cancel a workflow. Running workflows are signalled and finalize at
    /// the runner; queued and paused ones transition immediately.
    pub async fn cancel(&self, id: WorkflowId) -> Result<()> {
        if let Some(control) = self.shared.running.get(&id) {
            // Runner applies the transition, releases any in-flight lease as
            // cancelled, and frees the slot.
            let _ = control.send(ControlSignal::Cancel);
            return Ok(());
        }

        let snapshot = {
            let mut workflow = self
                .shared
                .workflows
                .get_mut(&id)
                .ok_or(CoreError::WorkflowNotFound { workflow_id: id })?;
            WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Cancel)?;
            workflow.clone()
        };
        self.shared.queue.lock().retain(|e| e.workflow_id != id);
        self.shared.stats.lock().cancelled += 1;
        if let Err(err) = self.shared.store.save_workflow(&snapshot).await {
            warn!(workflow_id = %id, error = %err, "failed to persist cancelled workflow");
        }
        info!(workflow_id = %id, "workflow cancelled");
        Ok(())
    }

    /// Request a pause; takes effect at the next step boundary.
    pub fn pause(&self, id: WorkflowId) -> Result<()> {
        let status = self
            .shared
            .workflows
            .get(&id)
            .map(|w| w.status)
            .ok_or(CoreError::WorkflowNotFound { workflow_id: id })?;
        let Some(control) = self.shared.running.get(&id) else {
            return Err(StateMachineError::InvalidTransition {
                from: status,
                event: "pause".to_string(),
            }
            .into());
        };
        let _ = control.send(ControlSignal::Pause);
        debug!(workflow_id = %id, "pause requested");
        Ok(())
    }

    /// Resume a paused workflow. It re-enters the admission queue rather
    /// than running instantly.
    pub async fn resume(&self, id: WorkflowId) -> Result<()> {
        let snapshot = {
            let mut workflow = self
                .shared
                .workflows
                .get_mut(&id)
                .ok_or(CoreError::WorkflowNotFound { workflow_id: id })?;
            WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Resume)?;
            workflow.clone()
        };
        self.push_entry(QueueEntry {
            workflow_id: id,
            priority: snapshot.priority,
            enqueued_at: Utc::now(),
        });
        if let Err(err) = self.shared.store.save_workflow(&snapshot).await {
            warn!(workflow_id = %id, error = %err, "failed to persist resumed workflow");
        }
        debug!(workflow_id = %id, "workflow resumed");
        self.shared.wake.notify_waiters();
        Ok(())
    }

    pub fn statistics(&self) -> QueueStatistics {
        let stats = self.shared.stats.lock();
        let average_wait_ms = if stats.admitted == 0 {
            0.0
        } else {
            stats.total_wait_ms as f64 / stats.admitted as f64
        };
        QueueStatistics {
            queued: self.shared.queue.lock().len(),
            running: self.shared.running.len(),
            completed: stats.completed,
            failed: stats.failed,
            cancelled: stats.cancelled,
            average_wait_ms,
        }
    }

    /// Stop admitting workflows and wait for the admission loop to exit.
    /// Running workflows finish on their own tasks.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.shared.wake.notify_waiters();
        let handle = self.admission.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

/// Wake-driven admission. The notified futures are armed before scanning so
/// a release landing mid-scan is never lost.
async fn admission_loop(shared: Arc<SchedulerShared>, mut shutdown: watch::Receiver<bool>) {
    let availability = shared.registry.availability();
    loop {
        let wake = shared.wake.notified();
        let credential_freed = availability.notified();
        tokio::pin!(wake, credential_freed);

        admit_ready(&shared);

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = &mut wake => {}
            _ = &mut credential_freed => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Admit queued workflows head-to-tail while slots and credentials allow. A
/// workflow whose next step has no eligible credential is skipped without
/// blocking lower-priority ones behind it.
fn admit_ready(shared: &Arc<SchedulerShared>) {
    loop {
        if shared.running.len() >= shared.max_concurrent {
            return;
        }

        let admitted = {
            let mut queue = shared.queue.lock();
            let mut position = None;
            queue.retain(|entry| shared.workflows.contains_key(&entry.workflow_id));
            for (index, entry) in queue.iter().enumerate() {
                let Some(workflow) = shared.workflows.get(&entry.workflow_id) else {
                    continue;
                };
                if workflow.status != WorkflowState::Queued {
                    continue;
                }
                // No pending step left (a resume raced with the final step
                // finishing): admit anyway, the runner completes it.
                let eligible = match workflow.next_pending_step() {
                    None => true,
                    Some(step_index) => {
                        let step = &workflow.steps[step_index];
                        shared
                            .registry
                            .has_eligible(&step.provider_candidates, step.capability)
                    }
                };
                if eligible {
                    position = Some(index);
                    break;
                }
            }
            position.map(|index| queue.remove(index))
        };

        let Some(entry) = admitted else {
            return;
        };

        let admit_ok = {
            let Some(mut workflow) = shared.workflows.get_mut(&entry.workflow_id) else {
                continue;
            };
            match WorkflowStateMachine::apply(&mut workflow, WorkflowEvent::Admit) {
                Ok(_) => true,
                Err(err) => {
                    warn!(workflow_id = %entry.workflow_id, error = %err, "admission rejected");
                    false
                }
            }
        };
        if !admit_ok {
            continue;
        }

        {
            let mut stats = shared.stats.lock();
            stats.admitted += 1;
            stats.total_wait_ms +=
                (Utc::now() - entry.enqueued_at).num_milliseconds().max(0) as u128;
        }

        let (control, control_rx) = watch::channel(ControlSignal::Run);
        shared.running.insert(entry.workflow_id, control);
        debug!(workflow_id = %entry.workflow_id, "workflow admitted");
        tokio::spawn(run_workflow(
            Arc::clone(shared),
            entry.workflow_id,
            control_rx,
        ));
    }
}
