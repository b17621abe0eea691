use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::step::StepError;

/// Suffix appended to a function name to form its implicit completion event.
const FUNCTION_RESULT_SUFFIX: &str = ".OnResult";

/// An [Event] is a named signal carrying an opaque JSON payload.
///
/// Events are produced either by the caller starting a run or by a step
/// function, and are routed to their next step by the [EventRouter](crate::router::EventRouter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Name the event is routed by
    pub name: String,
    /// Opaque JSON payload
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// An event without payload, the payload is JSON `null`.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    /// Create an event whose payload is the JSON encoding of `data`.
    pub fn from_data<T: Serialize + ?Sized>(
        name: impl Into<String>,
        data: &T,
    ) -> Result<Self, StepError> {
        let name = name.into();
        let payload = serde_json::to_value(data).map_err(|source| StepError::Json {
            detail: format!("failed to encode payload of event `{name}`"),
            source,
        })?;
        Ok(Self { name, payload })
    }

    /// Decode the payload into `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| StepError::Json {
            detail: format!("failed to decode payload of event `{}`", self.name),
            source,
        })
    }

    /// Name of the event synthesized when `function` returns without emitting.
    pub fn function_result_name(function: &str) -> String {
        format!("{function}{FUNCTION_RESULT_SUFFIX}")
    }

    /// Whether this event is an implicit completion event.
    pub fn is_function_result(&self) -> bool {
        self.name.ends_with(FUNCTION_RESULT_SUFFIX)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.payload)
    }
}
