use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors detected while building a process or resolving its entry point.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("Process has no steps")]
    EmptyProcess,
    #[error("Step `{0}` is registered more than once")]
    DuplicateStep(String),
    #[error("Step `{0}` does not expose any function")]
    StepWithoutFunctions(String),
    #[error("Step not found: {0}")]
    UnknownStep(String),
    #[error("Step `{step}` has no function named `{function}`")]
    UnknownFunction { step: String, function: String },
    #[error("Step `{step}` exposes several functions, the target must name one of {functions:?}")]
    AmbiguousTarget { step: String, functions: Vec<String> },
    #[error(
        "Event `{event}` from {origin} is already routed to {existing}, refusing to also route it to {requested}"
    )]
    ConflictingSubscription {
        origin: RouteSource,
        event: String,
        existing: RouteTarget,
        requested: RouteTarget,
    },
    #[error("No subscription for input event `{0}`")]
    MissingEntry(String),
}

/// Where a routed event comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteSource {
    /// The caller starting a run.
    Input,
    /// A step of the process, by id.
    Step(String),
}

impl RouteSource {
    pub fn step(id: impl Into<String>) -> Self {
        Self::Step(id.into())
    }
}

/// The step function an event is delivered to.
///
/// Without an explicit function name the step must expose exactly one
/// function, this is checked when the process is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteTarget {
    /// Id of the target step
    pub step: String,
    /// Name of the target function, filled in when the process is built
    pub function: Option<String>,
}

impl RouteTarget {
    pub fn step(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            function: None,
        }
    }

    pub fn function(step: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            function: Some(function.into()),
        }
    }

    /// Whether both targets can denote the same step function.
    fn agrees_with(&self, other: &RouteTarget) -> bool {
        self.step == other.step
            && match (&self.function, &other.function) {
                (Some(mine), Some(theirs)) => mine == theirs,
                _ => true,
            }
    }
}

/// One routing edge: `(origin, event) -> target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Where the event comes from
    pub origin: RouteSource,
    /// Name of the routed event
    pub event: String,
    /// Step function the event is delivered to
    pub target: RouteTarget,
}

/// Static routing table built before a process runs.
///
/// At most one target exists per `(origin, event)` pair.
#[derive(Debug, Clone, Default)]
pub struct EventRouter {
    routes: HashMap<RouteSource, HashMap<String, usize>>,
    subscriptions: Vec<Subscription>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routing edge.
    ///
    /// Registering the same edge twice is a no-op. A target that only adds
    /// the function name to an unnamed one for the same step refines the
    /// edge. Any other target for an already routed pair fails with
    /// [ConfigurationError::ConflictingSubscription].
    pub fn subscribe(
        &mut self,
        origin: RouteSource,
        event: impl Into<String>,
        target: RouteTarget,
    ) -> Result<(), ConfigurationError> {
        let event = event.into();
        let events = self.routes.entry(origin.clone()).or_default();

        if let Some(&index) = events.get(&event) {
            let existing = &mut self.subscriptions[index].target;
            if !existing.agrees_with(&target) {
                return Err(ConfigurationError::ConflictingSubscription {
                    origin,
                    event,
                    existing: existing.clone(),
                    requested: target,
                });
            }
            if existing.function.is_none() {
                existing.function = target.function;
            }
            return Ok(());
        }

        events.insert(event.clone(), self.subscriptions.len());
        self.subscriptions.push(Subscription {
            origin,
            event,
            target,
        });
        Ok(())
    }

    /// Look up the target of an event, `None` when nothing subscribes to it.
    pub fn resolve(&self, origin: &RouteSource, event: &str) -> Option<&RouteTarget> {
        let index = *self.routes.get(origin)?.get(event)?;
        Some(&self.subscriptions[index].target)
    }

    /// All edges, in registration order.
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Targets of every edge, used to pin unnamed functions at build time.
    pub(crate) fn targets_mut(&mut self) -> impl Iterator<Item = &mut RouteTarget> {
        self.subscriptions
            .iter_mut()
            .map(|subscription| &mut subscription.target)
    }
}

impl Display for RouteSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteSource::Input => write!(f, "process input"),
            RouteSource::Step(id) => write!(f, "step `{id}`"),
        }
    }
}

impl Display for RouteTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(function) => write!(f, "{}.{function}", self.step),
            None => write!(f, "{}", self.step),
        }
    }
}
