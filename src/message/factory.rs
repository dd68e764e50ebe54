use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{Message, MessageError, MessageType, Payload};

/// Builds messages from a name, payload and metadata.
///
/// Pre-processors receive the runtime's factory so a substitute command can be
/// created without knowing how names map to message types.
pub trait MessageFactory: Send + Sync {
    fn create_message(
        &self,
        name: &str,
        payload: Value,
        metadata: Payload,
    ) -> Result<Message, MessageError>;
}

/// Name -> message type table that doubles as the default `MessageFactory`.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    types: HashMap<String, MessageType>,
}

impl MessageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, message_type: MessageType) -> Self {
        self.types.insert(name.into(), message_type);
        self
    }

    pub fn command(self, name: impl Into<String>) -> Self {
        self.with(name, MessageType::Command)
    }

    pub fn event(self, name: impl Into<String>) -> Self {
        self.with(name, MessageType::Event)
    }

    pub fn query(self, name: impl Into<String>) -> Self {
        self.with(name, MessageType::Query)
    }

    /// Add every entry of `other`; entries of `other` win on collision.
    pub fn merge(mut self, other: &MessageCatalog) -> Self {
        for (name, ty) in &other.types {
            self.types.insert(name.clone(), *ty);
        }
        self
    }

    pub fn message_type(&self, name: &str) -> Option<MessageType> {
        self.types.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl MessageFactory for MessageCatalog {
    fn create_message(
        &self,
        name: &str,
        payload: Value,
        metadata: Payload,
    ) -> Result<Message, MessageError> {
        let message_type = self
            .message_type(name)
            .ok_or_else(|| MessageError::UnknownMessage(name.to_string()))?;
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(MessageError::NotAnObject {
                    name: name.to_string(),
                })
            }
        };
        Ok(Message::from_parts(name, message_type, payload, metadata))
    }
}
