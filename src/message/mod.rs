//! Messages - the immutable envelope shared by commands, events and queries.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_process::Message;
//! use serde_json::json;
//!
//! let command = Message::command("RegisterUser", json!({
//!     "userId": "u1",
//!     "username": "alice",
//! }))?;
//!
//! assert_eq!(command.get_str("userId"), Some("u1"));
//! ```

mod factory;

pub use factory::{MessageCatalog, MessageFactory};

use std::fmt;
use std::time::SystemTime;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Ordered string-keyed map used for payloads and metadata.
pub type Payload = Map<String, Value>;

/// What a message is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Command,
    Event,
    Query,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Command => f.write_str("command"),
            MessageType::Event => f.write_str("event"),
            MessageType::Query => f.write_str("query"),
        }
    }
}

/// Error type for message construction and payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Payloads and metadata must be JSON objects.
    NotAnObject { name: String },
    /// The factory does not know this message name.
    UnknownMessage(String),
    /// The payload could not be decoded into the requested type.
    Decode(String),
    /// A typed payload could not be encoded.
    Encode(String),
}

impl MessageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MessageError::UnknownMessage(_) => ErrorKind::NotFound,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::NotAnObject { name } => {
                write!(f, "payload of message {} must be an object", name)
            }
            MessageError::UnknownMessage(name) => write!(f, "unknown message: {}", name),
            MessageError::Decode(msg) => write!(f, "payload decode failed: {}", msg),
            MessageError::Encode(msg) => write!(f, "payload encode failed: {}", msg),
        }
    }
}

impl std::error::Error for MessageError {}

/// An immutable command, event or query.
///
/// All "mutators" consume the message and return a new one, so a message
/// that has been handed to the store or a projector is never changed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    uuid: Uuid,
    name: String,
    message_type: MessageType,
    payload: Payload,
    #[serde(default)]
    metadata: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,
    created_at: SystemTime,
}

impl Message {
    /// Create a message from a JSON object payload.
    pub fn new(
        name: impl Into<String>,
        message_type: MessageType,
        payload: Value,
    ) -> Result<Self, MessageError> {
        let name = name.into();
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(MessageError::NotAnObject { name }),
        };
        Ok(Self::from_parts(name, message_type, payload, Map::new()))
    }

    /// Create a message from an already-split payload and metadata.
    pub fn from_parts(
        name: impl Into<String>,
        message_type: MessageType,
        payload: Payload,
        metadata: Payload,
    ) -> Self {
        Message {
            uuid: Uuid::new_v4(),
            name: name.into(),
            message_type,
            payload,
            metadata,
            causation_id: None,
            correlation_id: None,
            created_at: SystemTime::now(),
        }
    }

    pub fn command(name: impl Into<String>, payload: Value) -> Result<Self, MessageError> {
        Self::new(name, MessageType::Command, payload)
    }

    pub fn event(name: impl Into<String>, payload: Value) -> Result<Self, MessageError> {
        Self::new(name, MessageType::Event, payload)
    }

    pub fn query(name: impl Into<String>, payload: Value) -> Result<Self, MessageError> {
        Self::new(name, MessageType::Query, payload)
    }

    /// Create a message whose payload is the JSON encoding of `payload`.
    pub fn encode<T: Serialize>(
        name: impl Into<String>,
        message_type: MessageType,
        payload: &T,
    ) -> Result<Self, MessageError> {
        let value =
            serde_json::to_value(payload).map_err(|e| MessageError::Encode(e.to_string()))?;
        Self::new(name, message_type, value)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn metadata(&self) -> &Payload {
        &self.metadata
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.causation_id
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a string payload field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Look up a metadata entry.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Decode the payload into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| MessageError::Decode(e.to_string()))
    }

    /// The payload as a JSON value.
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the payload, keeping identity and metadata.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Add or overwrite a single payload field.
    pub fn with_payload_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Mark this message as caused by `cause`, inheriting its correlation id
    /// (or using the cause itself as the correlation root).
    pub fn caused_by(self, cause: &Message) -> Self {
        let correlation = cause.correlation_id.unwrap_or(cause.uuid);
        self.with_causation(cause.uuid).with_correlation(correlation)
    }
}
