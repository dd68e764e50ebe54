//! Schema validation seam.
//!
//! The runtime and the query dispatcher call the configured `SchemaValidator`
//! before accepting a payload and before returning a query result. Backends are
//! pluggable; `NoopValidator` accepts everything and `BasicSchemaValidator`
//! understands a small JSON-Schema subset.

mod basic;

pub use basic::BasicSchemaValidator;

use std::fmt;

use serde_json::Value;

use crate::error::ErrorKind;
use crate::message::Payload;

/// A payload or schema was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Message or query name the schema belongs to.
    pub context: String,
    /// JSON pointer-like path of the offending value (`""` for the root).
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        context: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            context: context.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ValidationFailed
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "validation failed for {}: {}", self.context, self.message)
        } else {
            write!(
                f,
                "validation failed for {} at {}: {}",
                self.context, self.path, self.message
            )
        }
    }
}

impl std::error::Error for ValidationError {}

/// Pluggable schema validation backend.
pub trait SchemaValidator: Send + Sync {
    /// Validate a command or query payload against its registered schema.
    fn assert_payload_schema(
        &self,
        context: &str,
        schema: &Value,
        payload: &Payload,
    ) -> Result<(), ValidationError>;

    /// Validate that a response type schema is itself usable.
    fn assert_response_type_schema(&self, context: &str, schema: &Value)
        -> Result<(), ValidationError>;

    /// Validate a resolver response against its response type schema.
    fn assert_response(
        &self,
        _context: &str,
        _schema: &Value,
        _response: &Value,
    ) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Validator that accepts every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

impl SchemaValidator for NoopValidator {
    fn assert_payload_schema(
        &self,
        _context: &str,
        _schema: &Value,
        _payload: &Payload,
    ) -> Result<(), ValidationError> {
        Ok(())
    }

    fn assert_response_type_schema(
        &self,
        _context: &str,
        _schema: &Value,
    ) -> Result<(), ValidationError> {
        Ok(())
    }
}
