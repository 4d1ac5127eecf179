//! Orchestration: scheduling, admission, and step execution.

pub mod core;
pub mod scheduler;
pub mod step_executor;
pub mod workflow_runner;

pub use self::core::{RecoverySummary, ResearchCore};
pub use scheduler::{QueueStatistics, Scheduler};
pub use step_executor::{StepExecutor, StepOutcome, StepRun};

/// Per-workflow control signal, delivered over a watch channel to the
/// runner. Pause and cancel take effect at the next step boundary; cancel
/// additionally interrupts a call already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}
