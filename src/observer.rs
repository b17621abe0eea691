use uuid::Uuid;

use crate::{
    event::Event,
    runner::{ProcessError, ProcessOutcome, StepExecution},
};

/// Hooks called by the runner at each stage of a run.
///
/// All hooks default to doing nothing. They are called inline on the task
/// driving the run, so implementations should return quickly.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessObserver: Send + Sync {
    fn on_run_started(&self, _run_id: Uuid, _process: &str, _event: &Event) {}

    fn on_step_started(&self, _run_id: Uuid, _step: &str, _function: &str) {}

    fn on_step_completed(&self, _run_id: Uuid, _execution: &StepExecution) {}

    /// An emitted event had no subscriber and ends its branch of the run.
    fn on_event_dropped(&self, _run_id: Uuid, _step: &str, _event: &Event) {}

    fn on_run_finished(&self, _outcome: &ProcessOutcome) {}

    fn on_run_failed(&self, _run_id: Uuid, _error: &ProcessError) {}
}
