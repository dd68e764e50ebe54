use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;
use crate::message::{Message, MessageType};

/// Accumulated state of one process, folded from its events.
///
/// Stored as a JSON value so apply functions of one process type can share it
/// without a common Rust type; `encode` / `decode` convert to and from typed
/// structs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessState(Value);

impl ProcessState {
    pub fn new(value: Value) -> Self {
        ProcessState(value)
    }

    pub fn encode<T: Serialize>(state: &T) -> Result<Self, DispatchError> {
        serde_json::to_value(state)
            .map(ProcessState)
            .map_err(|e| DispatchError::invalid(format!("state encode failed: {}", e)))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| DispatchError::invalid(format!("state decode failed: {}", e)))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for ProcessState {
    fn from(value: Value) -> Self {
        ProcessState(value)
    }
}

/// Everything a handle function may look at.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub process_type: &'a str,
    pub pid: &'a str,
    /// Version of `state` (0 for a new process).
    pub version: u64,
    pub state: Option<&'a ProcessState>,
    pub command: &'a Message,
    /// Values produced by the description's context providers, in order.
    pub context: &'a [Value],
}

impl<'a> Invocation<'a> {
    /// Decode the current state, `None` for a new process.
    pub fn state_as<S: DeserializeOwned>(&self) -> Result<Option<S>, DispatchError> {
        self.state.map(ProcessState::decode).transpose()
    }

    /// Decode the command payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        Ok(self.command.payload_as()?)
    }

    /// Build an event message from a JSON object payload.
    pub fn event(&self, name: &str, payload: Value) -> Result<Message, DispatchError> {
        Ok(Message::event(name, payload)?)
    }

    /// Build an event message from a typed payload.
    pub fn event_from<T: Serialize>(&self, name: &str, payload: &T) -> Result<Message, DispatchError> {
        Ok(Message::encode(name, MessageType::Event, payload)?)
    }
}

/// Adapt a typed apply function to the JSON-backed `ProcessState`.
///
/// ```ignore
/// builder.record_that("UserRegistered", apply_typed(|_: Option<User>, event| {
///     Ok(User { username: event.get_str("username").unwrap_or_default().into() })
/// }))
/// ```
pub fn apply_typed<S, F>(
    apply: F,
) -> impl Fn(Option<ProcessState>, &Message) -> Result<ProcessState, DispatchError> + Send + Sync + 'static
where
    S: Serialize + DeserializeOwned,
    F: Fn(Option<S>, &Message) -> Result<S, DispatchError> + Send + Sync + 'static,
{
    move |state, event| {
        let typed = state.as_ref().map(ProcessState::decode).transpose()?;
        let next = apply(typed, event)?;
        ProcessState::encode(&next)
    }
}
