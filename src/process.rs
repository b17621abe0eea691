use std::{
    collections::{HashMap, HashSet},
    fmt::{Debug, Formatter},
    hash::Hasher,
    sync::Arc,
};

use tracing::debug;
use twox_hash::XxHash64;

use crate::{
    config::ProcessConfig,
    event::Event,
    graph::ProcessGraph,
    observer::ProcessObserver,
    router::{ConfigurationError, EventRouter, RouteSource, RouteTarget},
    step::StepDefinition,
};

/// Builder for a [Process].
///
/// Steps and routing edges may be declared in any order, references between
/// them are only checked by [ProcessBuilder::build].
pub struct ProcessBuilder {
    name: String,
    config: ProcessConfig,
    steps: Vec<StepDefinition>,
    router: EventRouter,
    observer: Option<Arc<dyn ProcessObserver>>,
}

/// Pending routing edge created by the `on_*` methods of [ProcessBuilder].
#[must_use = "an edge is only registered once `send_event_to` is called"]
pub struct EdgeBuilder<'a> {
    builder: &'a mut ProcessBuilder,
    origin: RouteSource,
    event: String,
}

impl EdgeBuilder<'_> {
    pub fn send_event_to(self, target: RouteTarget) -> Result<(), ConfigurationError> {
        self.builder.router.subscribe(self.origin, self.event, target)
    }
}

impl ProcessBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ProcessConfig::default(),
            steps: Vec::new(),
            router: EventRouter::new(),
            observer: None,
        }
    }

    pub fn with_config(mut self, config: ProcessConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ProcessObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn add_step(&mut self, step: StepDefinition) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Route an event sent by the caller starting a run.
    pub fn on_input_event(&mut self, event: impl Into<String>) -> EdgeBuilder<'_> {
        EdgeBuilder {
            builder: self,
            origin: RouteSource::Input,
            event: event.into(),
        }
    }

    /// Route an event explicitly emitted by `step`.
    pub fn on_event(
        &mut self,
        step: impl Into<String>,
        event: impl Into<String>,
    ) -> EdgeBuilder<'_> {
        EdgeBuilder {
            builder: self,
            origin: RouteSource::step(step),
            event: event.into(),
        }
    }

    /// Route the implicit completion event of `step`'s `function`.
    pub fn on_function_result(
        &mut self,
        step: impl Into<String>,
        function: &str,
    ) -> EdgeBuilder<'_> {
        EdgeBuilder {
            builder: self,
            origin: RouteSource::step(step),
            event: Event::function_result_name(function),
        }
    }

    /// Validate the graph and freeze it.
    pub fn build(mut self) -> Result<Process, ConfigurationError> {
        if self.steps.is_empty() {
            return Err(ConfigurationError::EmptyProcess);
        }

        let mut index = HashMap::with_capacity(self.steps.len());
        for (position, step) in self.steps.iter().enumerate() {
            if step.functions().is_empty() {
                return Err(ConfigurationError::StepWithoutFunctions(step.id().to_owned()));
            }
            if index.insert(step.id().to_owned(), position).is_some() {
                return Err(ConfigurationError::DuplicateStep(step.id().to_owned()));
            }
        }

        for subscription in self.router.subscriptions() {
            if let RouteSource::Step(origin) = &subscription.origin {
                if !index.contains_key(origin) {
                    return Err(ConfigurationError::UnknownStep(origin.clone()));
                }
            }
        }

        for target in self.router.targets_mut() {
            let step = index
                .get(&target.step)
                .map(|&position| &self.steps[position])
                .ok_or_else(|| ConfigurationError::UnknownStep(target.step.clone()))?;
            pin_function(step, target)?;
        }

        let graph = ProcessGraph::new(&self.steps, self.router.subscriptions());
        let fingerprint = fingerprint(&self.name, &self.steps, &self.router);
        debug!(
            process = %self.name,
            steps = self.steps.len(),
            routes = self.router.len(),
            fingerprint,
            "Built process"
        );

        Ok(Process {
            inner: Arc::new(ProcessInner {
                name: self.name,
                config: self.config,
                steps: self.steps,
                index,
                router: self.router,
                graph,
                fingerprint,
                observer: self.observer,
            }),
        })
    }
}

/// Name the function an unnamed target refers to, or check the named one exists.
fn pin_function(step: &StepDefinition, target: &mut RouteTarget) -> Result<(), ConfigurationError> {
    match &target.function {
        Some(function) if step.function(function).is_none() => {
            Err(ConfigurationError::UnknownFunction {
                step: step.id().to_owned(),
                function: function.clone(),
            })
        }
        Some(_) => Ok(()),
        None => match step.functions() {
            [only] => {
                target.function = Some(only.name().to_owned());
                Ok(())
            }
            functions => Err(ConfigurationError::AmbiguousTarget {
                step: step.id().to_owned(),
                functions: functions
                    .iter()
                    .map(|function| function.name().to_owned())
                    .collect(),
            }),
        },
    }
}

/// Stable hash of everything that shapes a run: steps, their functions and
/// declared state, and the routing table.
fn fingerprint(name: &str, steps: &[StepDefinition], router: &EventRouter) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    let mut write = |part: &str| {
        hasher.write(part.as_bytes());
        hasher.write_u8(0xff);
    };

    write(name);
    for step in steps {
        write(step.id());
        write(if step.initial_state().is_some() { "stateful" } else { "stateless" });
        for function in step.functions() {
            write(function.name());
            write(function.input_type());
        }
    }
    for subscription in router.subscriptions() {
        write(&subscription.origin.to_string());
        write(&subscription.event);
        write(&subscription.target.to_string());
    }

    hasher.finish()
}

/// A built, immutable process graph.
///
/// Cloning is cheap. Every call to [Process::start] creates
/// an independent run, so one process may serve many concurrent runs.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

struct ProcessInner {
    name: String,
    config: ProcessConfig,
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
    router: EventRouter,
    graph: ProcessGraph,
    fingerprint: u64,
    observer: Option<Arc<dyn ProcessObserver>>,
}

impl Process {
    pub fn builder(name: impl Into<String>) -> ProcessBuilder {
        ProcessBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.inner.config
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.inner.steps
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.inner
            .index
            .get(id)
            .map(|&position| &self.inner.steps[position])
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    pub fn fingerprint(&self) -> u64 {
        self.inner.fingerprint
    }

    /// Input events the process can be started with.
    pub fn input_events(&self) -> HashSet<&str> {
        self.inner
            .router
            .subscriptions()
            .iter()
            .filter(|subscription| subscription.origin == RouteSource::Input)
            .map(|subscription| subscription.event.as_str())
            .collect()
    }

    pub(crate) fn graph(&self) -> &ProcessGraph {
        &self.inner.graph
    }

    pub(crate) fn observer(&self) -> Option<&dyn ProcessObserver> {
        self.inner.observer.as_deref()
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.inner.name)
            .field("steps", &self.inner.steps)
            .field("router", &self.inner.router)
            .field("fingerprint", &self.inner.fingerprint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::step::StepFunction;

    fn echo(name: &str) -> StepFunction {
        StepFunction::new(name, |_ctx, input: Value| async move { Ok(input) })
    }

    fn step(id: &str, functions: &[&str]) -> StepDefinition {
        functions
            .iter()
            .fold(StepDefinition::new(id), |step, name| {
                step.with_function(echo(name))
            })
    }

    fn greeting_builder() -> ProcessBuilder {
        let mut builder = ProcessBuilder::new("Greeting");
        builder
            .add_step(step("GetName", &["GetName"]))
            .add_step(step("GenerateGreeting", &["Generate"]));
        builder
            .on_input_event("StartProcess")
            .send_event_to(RouteTarget::step("GetName"))
            .unwrap();
        builder
            .on_function_result("GetName", "GetName")
            .send_event_to(RouteTarget::step("GenerateGreeting"))
            .unwrap();
        builder
    }

    #[test]
    fn test_build_pins_single_function_targets() {
        let process = greeting_builder().build().unwrap();

        assert_eq!(
            process
                .router()
                .resolve(&RouteSource::step("GetName"), "GetName.OnResult"),
            Some(&RouteTarget::function("GenerateGreeting", "Generate"))
        );
        assert_eq!(process.input_events(), HashSet::from(["StartProcess"]));
        assert!(process.step("GetName").is_some());
        assert!(process.step("Missing").is_none());
    }

    #[test]
    fn test_build_rejects_empty_process() {
        let err = ProcessBuilder::new("Empty").build().unwrap_err();

        assert_eq!(err, ConfigurationError::EmptyProcess);
    }

    #[test]
    fn test_build_rejects_duplicate_steps() {
        let mut builder = greeting_builder();
        builder.add_step(step("GetName", &["Other"]));

        let err = builder.build().unwrap_err();

        assert_eq!(err, ConfigurationError::DuplicateStep("GetName".to_owned()));
    }

    #[test]
    fn test_build_rejects_step_without_functions() {
        let mut builder = greeting_builder();
        builder.add_step(StepDefinition::new("Hollow"));

        let err = builder.build().unwrap_err();

        assert_eq!(err, ConfigurationError::StepWithoutFunctions("Hollow".to_owned()));
    }

    #[test]
    fn test_build_rejects_unknown_target_step() {
        let mut builder = greeting_builder();
        builder
            .on_event("GenerateGreeting", "Done")
            .send_event_to(RouteTarget::step("Publish"))
            .unwrap();

        let err = builder.build().unwrap_err();

        assert_eq!(err, ConfigurationError::UnknownStep("Publish".to_owned()));
    }

    #[test]
    fn test_build_rejects_unknown_origin_step() {
        let mut builder = greeting_builder();
        builder
            .on_event("Ghost", "Done")
            .send_event_to(RouteTarget::step("GetName"))
            .unwrap();

        let err = builder.build().unwrap_err();

        assert_eq!(err, ConfigurationError::UnknownStep("Ghost".to_owned()));
    }

    #[test]
    fn test_build_rejects_unknown_function() {
        let mut builder = greeting_builder();
        builder
            .on_event("GenerateGreeting", "Retry")
            .send_event_to(RouteTarget::function("GetName", "Missing"))
            .unwrap();

        let err = builder.build().unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::UnknownFunction {
                step: "GetName".to_owned(),
                function: "Missing".to_owned(),
            }
        );
    }

    #[test]
    fn test_build_rejects_unnamed_target_on_multi_function_step() {
        let mut builder = ProcessBuilder::new("Article");
        builder.add_step(step("GenerateContent", &["Start", "Continue"]));
        builder
            .on_input_event("CreateArticle")
            .send_event_to(RouteTarget::step("GenerateContent"))
            .unwrap();

        let err = builder.build().unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::AmbiguousTarget {
                step: "GenerateContent".to_owned(),
                functions: vec!["Start".to_owned(), "Continue".to_owned()],
            }
        );
    }

    #[test]
    fn test_conflicting_edge_is_rejected_while_building() {
        let mut builder = greeting_builder();

        let err = builder
            .on_input_event("StartProcess")
            .send_event_to(RouteTarget::step("GenerateGreeting"))
            .unwrap_err();

        assert!(matches!(err, ConfigurationError::ConflictingSubscription { .. }));
    }

    #[test]
    fn test_unnamed_and_named_edge_to_single_function_step_agree() {
        let mut builder = greeting_builder();
        builder
            .on_input_event("StartProcess")
            .send_event_to(RouteTarget::function("GetName", "GetName"))
            .unwrap();

        let process = builder.build().unwrap();

        assert_eq!(process.router().len(), 2);
        assert_eq!(
            process.router().resolve(&RouteSource::Input, "StartProcess"),
            Some(&RouteTarget::function("GetName", "GetName"))
        );
        assert_eq!(
            process.fingerprint(),
            greeting_builder().build().unwrap().fingerprint()
        );
    }

    #[test]
    fn test_fingerprint_tracks_graph_shape() {
        let first = greeting_builder().build().unwrap();
        let second = greeting_builder().build().unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());

        let mut builder = greeting_builder();
        builder
            .on_event("GenerateGreeting", "Again")
            .send_event_to(RouteTarget::step("GetName"))
            .unwrap();
        let changed = builder.build().unwrap();

        assert_ne!(first.fingerprint(), changed.fingerprint());
    }
}
