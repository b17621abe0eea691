use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    event::Event,
    process::Process,
    router::{ConfigurationError, RouteSource, RouteTarget},
    snapshot::{ProcessSnapshot, SnapshotError},
    step::{StepContext, StepDefinition, StepError, StepFunction},
};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Step `{step}` failed in function `{function}`: {source}")]
    StepExecution {
        step: String,
        function: String,
        #[source]
        source: StepError,
    },
    #[error("Step `{step}` did not finish function `{function}` within {timeout:?}")]
    StepTimedOut {
        step: String,
        function: String,
        timeout: Duration,
    },
    #[error("Run exceeded its limit of {limit} step invocations")]
    DispatchLimitExceeded { limit: usize },
    #[error("Run produced no terminal event named `{0}`")]
    MissingOutput(String),
    #[error("Step `{step}` produced no terminal event named `{event}`")]
    MissingStepOutput { step: String, event: String },
    #[error("Step `{0}` holds no state in this run")]
    MissingState(String),
    #[error("Invalid payload: {0}")]
    Payload(#[source] StepError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Record of a single step function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Position in the run, starting at 0.
    pub sequence: usize,
    /// Id of the invoked step
    pub step: String,
    /// Name of the invoked function
    pub function: String,
    /// Name of the event that triggered the invocation.
    pub trigger: String,
    /// Names of the events the invocation produced, in emission order.
    pub emitted: Vec<String>,
    /// When the invocation started
    pub started_at: DateTime<Utc>,
    /// Wall time spent in the step function
    pub elapsed: Duration,
}

/// An event no subscription picked up, with the step that emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalEvent {
    /// Id of the emitting step
    pub step: String,
    /// The unrouted event
    pub event: Event,
}

/// Result of a finished run.
///
/// Events that no subscription picked up end their branch of the run and are
/// collected in `terminal_events`, this is how a run hands data back to its
/// caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// Id of the run
    pub run_id: Uuid,
    /// Name of the process that ran
    pub process: String,
    /// Unrouted events, in the order they were emitted
    pub terminal_events: Vec<TerminalEvent>,
    /// Every step invocation, in execution order
    pub history: Vec<StepExecution>,
    /// Final state of every stateful step.
    pub states: BTreeMap<String, Value>,
    /// When the input event was accepted
    pub started_at: DateTime<Utc>,
    /// When the queue ran empty
    pub finished_at: DateTime<Utc>,
}

impl ProcessOutcome {
    /// Last terminal event named `name`, whichever step emitted it.
    pub fn terminal_event(&self, name: &str) -> Option<&Event> {
        self.terminal_events
            .iter()
            .rev()
            .find(|terminal| terminal.event.name == name)
            .map(|terminal| &terminal.event)
    }

    /// Last terminal event named `name` emitted by `step`.
    pub fn terminal_event_from(&self, step: &str, name: &str) -> Option<&Event> {
        self.terminal_events
            .iter()
            .rev()
            .find(|terminal| terminal.step == step && terminal.event.name == name)
            .map(|terminal| &terminal.event)
    }

    /// Decode the payload of the last terminal event named `name`.
    ///
    /// Completion events are named after the function only, use
    /// [ProcessOutcome::output_from] when several steps share a function name.
    pub fn output<T: DeserializeOwned>(&self, name: &str) -> Result<T, ProcessError> {
        self.terminal_event(name)
            .ok_or_else(|| ProcessError::MissingOutput(name.to_owned()))?
            .data()
            .map_err(ProcessError::Payload)
    }

    /// Decode the payload of the last terminal event named `name` emitted by `step`.
    pub fn output_from<T: DeserializeOwned>(
        &self,
        step: &str,
        name: &str,
    ) -> Result<T, ProcessError> {
        self.terminal_event_from(step, name)
            .ok_or_else(|| ProcessError::MissingStepOutput {
                step: step.to_owned(),
                event: name.to_owned(),
            })?
            .data()
            .map_err(ProcessError::Payload)
    }

    /// Decode the final state of `step`.
    pub fn state<T: DeserializeOwned>(&self, step: &str) -> Result<T, ProcessError> {
        let state = self
            .states
            .get(step)
            .ok_or_else(|| ProcessError::MissingState(step.to_owned()))?;
        serde_json::from_value(state.clone()).map_err(|source| {
            ProcessError::Payload(StepError::Json {
                detail: format!("failed to decode state of step `{step}`"),
                source,
            })
        })
    }

    /// Number of step invocations in the run.
    pub fn dispatches(&self) -> usize {
        self.history.len()
    }
}

impl Process {
    /// Start a new run with the input event `event`.
    ///
    /// The run owns fresh state for every stateful step and drains its event
    /// queue one invocation at a time. It returns once no routable event is
    /// left, or with the first error.
    pub async fn start(
        &self,
        event: impl Into<String>,
        payload: Value,
    ) -> Result<ProcessOutcome, ProcessError> {
        self.start_with(Event::new(event, payload)).await
    }

    pub async fn start_with(&self, event: Event) -> Result<ProcessOutcome, ProcessError> {
        ProcessInstance::new(self, HashMap::new()).run(event).await
    }

    /// Start a run whose step state is seeded from a persisted snapshot.
    ///
    /// The snapshot must come from a process with the same fingerprint.
    /// Stateful steps missing from the snapshot start from their initial state.
    pub async fn resume(
        &self,
        snapshot: &ProcessSnapshot,
        event: Event,
    ) -> Result<ProcessOutcome, ProcessError> {
        snapshot.verify(self)?;
        ProcessInstance::new(self, snapshot.states.clone().into_iter().collect())
            .run(event)
            .await
    }
}

/// Unit of work waiting in the run queue.
struct Dispatch {
    step: String,
    function: String,
    event: Event,
}

/// The live state of one run: step state, the work queue and what happened so far.
pub(crate) struct ProcessInstance {
    process: Process,
    run_id: Uuid,
    states: HashMap<String, Arc<Mutex<Value>>>,
    queue: VecDeque<Dispatch>,
    history: Vec<StepExecution>,
    terminal_events: Vec<TerminalEvent>,
}

impl ProcessInstance {
    fn new(process: &Process, mut seed: HashMap<String, Value>) -> Self {
        let states = process
            .steps()
            .iter()
            .filter_map(|step| {
                let initial = step.initial_state()?;
                let state = seed.remove(step.id()).unwrap_or_else(|| initial.clone());
                Some((step.id().to_owned(), Arc::new(Mutex::new(state))))
            })
            .collect();

        Self {
            process: process.clone(),
            run_id: Uuid::new_v4(),
            states,
            queue: VecDeque::new(),
            history: Vec::new(),
            terminal_events: Vec::new(),
        }
    }

    async fn run(self, event: Event) -> Result<ProcessOutcome, ProcessError> {
        let span = info_span!(
            "process_run",
            process = %self.process.name(),
            run_id = %self.run_id
        );
        let process = self.process.clone();
        let run_id = self.run_id;

        let result = self.drive(event).instrument(span).await;
        if let (Err(err), Some(observer)) = (&result, process.observer()) {
            observer.on_run_failed(run_id, err);
        }
        result
    }

    async fn drive(mut self, event: Event) -> Result<ProcessOutcome, ProcessError> {
        let entry = self
            .process
            .router()
            .resolve(&RouteSource::Input, &event.name)
            .ok_or_else(|| ConfigurationError::MissingEntry(event.name.clone()))?
            .clone();

        let started_at = Utc::now();
        info!(event = %event.name, "Process run started");
        if let Some(observer) = self.process.observer() {
            observer.on_run_started(self.run_id, self.process.name(), &event);
        }
        self.enqueue(&entry, event)?;

        while let Some(dispatch) = self.queue.pop_front() {
            if let Some(limit) = self.process.config().max_dispatches {
                if self.history.len() >= limit {
                    warn!(limit, "Dispatch limit reached, aborting run");
                    return Err(ProcessError::DispatchLimitExceeded { limit });
                }
            }
            self.dispatch(dispatch).await?;
        }

        let mut states = BTreeMap::new();
        for (step, state) in &self.states {
            states.insert(step.clone(), state.lock().await.clone());
        }

        let outcome = ProcessOutcome {
            run_id: self.run_id,
            process: self.process.name().to_owned(),
            terminal_events: self.terminal_events,
            history: self.history,
            states,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            dispatches = outcome.dispatches(),
            terminal_events = outcome.terminal_events.len(),
            "Process run finished"
        );

        if let Some(dir) = self.process.config().autosave_dir() {
            let snapshot = ProcessSnapshot::from_outcome(&self.process, &outcome);
            let path = snapshot.default_path(dir);
            match snapshot.save(&path).await {
                Ok(()) => debug!(path = %path.display(), "Saved run snapshot"),
                Err(err) => warn!(path = %path.display(), error = %err, "Failed to save run snapshot"),
            }
        }
        if let Some(observer) = self.process.observer() {
            observer.on_run_finished(&outcome);
        }
        Ok(outcome)
    }

    /// Invoke one step function and route what it produced.
    async fn dispatch(&mut self, dispatch: Dispatch) -> Result<(), ProcessError> {
        let Dispatch {
            step: step_id,
            function: function_name,
            event,
        } = dispatch;
        let process = self.process.clone();
        let (step, function) = lookup(&process, &step_id, &function_name)?;

        let ctx = StepContext::new(
            self.run_id,
            step.id(),
            function.name(),
            self.states.get(step.id()).map(Arc::clone),
        );
        debug!(step = %step_id, function = %function_name, event = %event.name, "Invoking step");
        if let Some(observer) = process.observer() {
            observer.on_step_started(self.run_id, &step_id, &function_name);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let invocation = function.invoke(ctx.clone(), event.payload);
        let result = match process.config().step_timeout {
            Some(timeout) => tokio::time::timeout(timeout, invocation)
                .await
                .map_err(|_| ProcessError::StepTimedOut {
                    step: step_id.clone(),
                    function: function_name.clone(),
                    timeout,
                })?,
            None => invocation.await,
        };
        let value = result.map_err(|source| ProcessError::StepExecution {
            step: step_id.clone(),
            function: function_name.clone(),
            source,
        })?;

        let mut emitted = ctx.take_emitted();
        if emitted.is_empty() {
            emitted.push(Event::new(Event::function_result_name(&function_name), value));
        }

        let execution = StepExecution {
            sequence: self.history.len(),
            step: step_id.clone(),
            function: function_name,
            trigger: event.name,
            emitted: emitted.iter().map(|event| event.name.clone()).collect(),
            started_at,
            elapsed: clock.elapsed(),
        };
        if let Some(observer) = process.observer() {
            observer.on_step_completed(self.run_id, &execution);
        }
        self.history.push(execution);

        let origin = RouteSource::Step(step_id.clone());
        for event in emitted {
            match process.router().resolve(&origin, &event.name) {
                Some(target) => self.enqueue(target, event)?,
                None => {
                    debug!(step = %step_id, event = %event.name, "No subscriber for event, ending branch");
                    if let Some(observer) = process.observer() {
                        observer.on_event_dropped(self.run_id, &step_id, &event);
                    }
                    self.terminal_events.push(TerminalEvent {
                        step: step_id.clone(),
                        event,
                    });
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, target: &RouteTarget, event: Event) -> Result<(), ProcessError> {
        // Targets are pinned to a function when the process is built.
        let (step, function) = match target.function.as_deref() {
            Some(function) => lookup(&self.process, &target.step, function)?,
            None => single_function(&self.process, &target.step)?,
        };
        self.queue.push_back(Dispatch {
            step: step.id().to_owned(),
            function: function.name().to_owned(),
            event,
        });
        Ok(())
    }
}

fn lookup<'a>(
    process: &'a Process,
    step: &str,
    function: &str,
) -> Result<(&'a StepDefinition, &'a StepFunction), ProcessError> {
    let definition = process
        .step(step)
        .ok_or_else(|| ConfigurationError::UnknownStep(step.to_owned()))?;
    let function = definition
        .function(function)
        .ok_or_else(|| ConfigurationError::UnknownFunction {
            step: step.to_owned(),
            function: function.to_owned(),
        })?;
    Ok((definition, function))
}

fn single_function<'a>(
    process: &'a Process,
    step: &str,
) -> Result<(&'a StepDefinition, &'a StepFunction), ProcessError> {
    let definition = process
        .step(step)
        .ok_or_else(|| ConfigurationError::UnknownStep(step.to_owned()))?;
    match definition.functions() {
        [only] => Ok((definition, only)),
        functions => Err(ConfigurationError::AmbiguousTarget {
            step: step.to_owned(),
            functions: functions
                .iter()
                .map(|function| function.name().to_owned())
                .collect(),
        }
        .into()),
    }
}
