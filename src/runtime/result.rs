use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DispatchError;
use crate::message::{Message, Payload};
use crate::projection::ProjectionError;
use crate::registry::ProcessState;
use crate::store::StoredEvent;

/// Steps a successful dispatch passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchStage {
    Received,
    IdentifierExtracted,
    /// History of an existing process was folded.
    StateLoaded,
    /// A new process was confirmed to have no history.
    New,
    Handled,
    EventsPersisted,
    Applied,
    Completed,
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct CommandDispatchResult {
    /// The command that was handled (the substitute, after a redirect).
    pub command: Message,
    pub process_type: String,
    pub pid: String,
    /// Events appended by this dispatch, in yield order.
    pub events: Vec<StoredEvent>,
    /// State after applying `events`.
    pub state: Option<ProcessState>,
    /// Process version after this dispatch.
    pub version: u64,
    pub stages: Vec<DispatchStage>,
    /// Projectors that halted while catching up. The events stay committed.
    pub projection_failures: Vec<ProjectionError>,
}

impl CommandDispatchResult {
    /// Result for a pre-processor that answers a command without dispatching it.
    pub fn short_circuit(command: Message, process_type: impl Into<String>) -> Self {
        CommandDispatchResult {
            command,
            process_type: process_type.into(),
            pid: String::new(),
            events: Vec::new(),
            state: None,
            version: 0,
            stages: vec![DispatchStage::Received, DispatchStage::Completed],
            projection_failures: Vec::new(),
        }
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.name()).collect()
    }

    pub fn is_short_circuit(&self) -> bool {
        self.pid.is_empty()
    }

    /// JSON body used by `CommandResponse`.
    pub fn to_body(&self) -> Value {
        let events: Vec<Value> = self
            .events
            .iter()
            .map(|e| {
                json!({
                    "name": e.name(),
                    "version": e.version,
                    "position": e.position,
                    "payload": e.event.payload_value(),
                })
            })
            .collect();
        let projection_failures: Vec<String> = self
            .projection_failures
            .iter()
            .map(ToString::to_string)
            .collect();
        json!({
            "command": self.command.name(),
            "processType": self.process_type,
            "pid": self.pid,
            "version": self.version,
            "events": events,
            "state": self.state.as_ref().map(ProcessState::as_value),
            "projectionFailures": projection_failures,
        })
    }
}

/// An inbound command request (typically deserialized from an HTTP POST body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Payload,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        CommandRequest {
            command: command.into(),
            payload,
            metadata: Payload::new(),
        }
    }
}

/// The response returned after dispatching a `CommandRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// HTTP-style status code.
    pub status: u16,
    pub body: Value,
}

impl CommandResponse {
    pub fn ok(result: &CommandDispatchResult) -> Self {
        CommandResponse {
            status: 200,
            body: result.to_body(),
        }
    }

    pub fn from_error(err: &DispatchError) -> Self {
        CommandResponse {
            status: err.status_code(),
            body: json!({
                "error": err.to_string(),
                "kind": err.kind().as_str(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<DispatchError> for CommandResponse {
    fn from(err: DispatchError) -> Self {
        Self::from_error(&err)
    }
}
