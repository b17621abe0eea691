use std::{
    fmt::{Debug, Formatter},
    future::Future,
    sync::{Arc, PoisonError},
};

use futures::{FutureExt, future::BoxFuture};
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event::Event;

/// The future returned by every step function.
pub type StepFuture = BoxFuture<'static, Result<Value, StepError>>;

type Handler = Arc<dyn Fn(StepContext, Value) -> StepFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step failed: {0}")]
    Failed(String),
    #[error("JSON error, detail: {detail}, source: {source}")]
    Json {
        detail: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid input for function `{function}`: {source}")]
    InvalidInput {
        function: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Step `{step}` does not declare any state")]
    NoState { step: String },
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A named entry point of a step.
///
/// The router selects a function by explicit name, so a step may expose
/// several of them, each with its own input type.
#[derive(Clone)]
pub struct StepFunction {
    name: String,
    input_type: String,
    input_schema: Option<Value>,
    handler: Handler,
}

impl StepFunction {
    /// Create a function that works on raw JSON payloads.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            input_type: "Value".to_owned(),
            input_schema: None,
            handler: Arc::new(move |ctx: StepContext, input: Value| -> StepFuture {
                handler(ctx, input).boxed()
            }),
        }
    }

    /// Create a function with a typed input and output.
    ///
    /// The payload is decoded into `I` before the handler runs, a payload that
    /// does not match fails the invocation with [StepError::InvalidInput].
    /// The returned `O` is encoded back to JSON and becomes the payload of the
    /// implicit completion event.
    pub fn typed<I, O, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(StepContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, StepError>> + Send + 'static,
    {
        let name = name.into();
        let function = name.clone();
        let handler: Handler = Arc::new(move |ctx: StepContext, input: Value| -> StepFuture {
            let input = match serde_json::from_value::<I>(input) {
                Ok(input) => input,
                Err(source) => {
                    let function = function.clone();
                    return async move { Err(StepError::InvalidInput { function, source }) }
                        .boxed();
                }
            };
            let function = function.clone();
            let output = handler(ctx, input);
            async move {
                let output = output.await?;
                serde_json::to_value(output).map_err(|source| StepError::Json {
                    detail: format!("failed to encode result of function `{function}`"),
                    source,
                })
            }
            .boxed()
        });

        Self {
            name,
            input_type: I::schema_name().into_owned(),
            input_schema: serde_json::to_value(schemars::schema_for!(I)).ok(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_type(&self) -> &str {
        &self.input_type
    }

    pub fn input_schema(&self) -> Option<&Value> {
        self.input_schema.as_ref()
    }

    pub(crate) fn invoke(&self, ctx: StepContext, input: Value) -> StepFuture {
        (self.handler)(ctx, input)
    }
}

impl Debug for StepFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepFunction")
            .field("name", &self.name)
            .field("input_type", &self.input_type)
            .finish_non_exhaustive()
    }
}

/// A named unit of work: one or more [StepFunction]s plus optional state
/// that lives for the duration of a single process run.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    id: String,
    functions: Vec<StepFunction>,
    initial_state: Option<Value>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            functions: Vec::new(),
            initial_state: None,
        }
    }

    pub fn with_function(mut self, function: StepFunction) -> Self {
        self.functions.push(function);
        self
    }

    /// Declare per-run state for this step, seeded with `initial` at the
    /// start of every run.
    pub fn with_state<T: Serialize + ?Sized>(self, initial: &T) -> Result<Self, StepError> {
        let state = serde_json::to_value(initial).map_err(|source| StepError::Json {
            detail: format!("failed to encode initial state of step `{}`", self.id),
            source,
        })?;
        Ok(self.with_state_value(state))
    }

    pub fn with_state_value(mut self, initial: Value) -> Self {
        self.initial_state = Some(initial);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn functions(&self) -> &[StepFunction] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&StepFunction> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn initial_state(&self) -> Option<&Value> {
        self.initial_state.as_ref()
    }
}

/// Handle given to a step function for the duration of one invocation.
///
/// Through it the function emits events and reads or mutates the state of
/// its step. Cloning the context is cheap, clones share the same emission
/// buffer and state.
#[derive(Clone)]
pub struct StepContext {
    run_id: Uuid,
    step_id: String,
    function: String,
    state: Option<Arc<Mutex<Value>>>,
    emitted: Arc<std::sync::Mutex<Vec<Event>>>,
}

impl StepContext {
    pub(crate) fn new(
        run_id: Uuid,
        step_id: impl Into<String>,
        function: impl Into<String>,
        state: Option<Arc<Mutex<Value>>>,
    ) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
            function: function.into(),
            state,
            emitted: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Emit an event. Events are routed in the order they are emitted.
    pub fn emit(&self, event: Event) {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Emit an event whose payload is the JSON encoding of `data`.
    pub fn emit_event<T: Serialize + ?Sized>(
        &self,
        name: impl Into<String>,
        data: &T,
    ) -> Result<(), StepError> {
        self.emit(Event::from_data(name, data)?);
        Ok(())
    }

    /// Read the current state of the step.
    pub async fn state<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        let state = self.state_cell()?.lock().await;
        serde_json::from_value(state.clone()).map_err(|source| StepError::Json {
            detail: format!("failed to decode state of step `{}`", self.step_id),
            source,
        })
    }

    /// Replace the state of the step.
    pub async fn set_state<T: Serialize + ?Sized>(&self, state: &T) -> Result<(), StepError> {
        let value = serde_json::to_value(state).map_err(|source| StepError::Json {
            detail: format!("failed to encode state of step `{}`", self.step_id),
            source,
        })?;
        *self.state_cell()?.lock().await = value;
        Ok(())
    }

    /// Read, mutate and write back the state in one go.
    ///
    /// The state lock is held while `update` runs, so no other clone of this
    /// context can observe an intermediate value.
    pub async fn update_state<T, R, F>(&self, update: F) -> Result<R, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.state_cell()?.lock().await;
        let mut state: T =
            serde_json::from_value(guard.clone()).map_err(|source| StepError::Json {
                detail: format!("failed to decode state of step `{}`", self.step_id),
                source,
            })?;
        let result = update(&mut state);
        *guard = serde_json::to_value(&state).map_err(|source| StepError::Json {
            detail: format!("failed to encode state of step `{}`", self.step_id),
            source,
        })?;
        Ok(result)
    }

    /// Drain the events emitted so far.
    pub(crate) fn take_emitted(&self) -> Vec<Event> {
        std::mem::take(&mut *self.emitted.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn state_cell(&self) -> Result<&Mutex<Value>, StepError> {
        self.state.as_deref().ok_or_else(|| StepError::NoState {
            step: self.step_id.clone(),
        })
    }
}
