use serde_json::Value;

use super::{SchemaValidator, ValidationError};
use crate::message::Payload;

/// Validator for the JSON-Schema subset the framework's own tests and demos need:
/// `type`, `properties`, `required`, `items`, `minLength`, `minimum` and `enum`.
///
/// Unknown keywords are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicSchemaValidator;

impl BasicSchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

const TYPES: &[&str] = &[
    "object", "array", "string", "integer", "number", "boolean", "null",
];

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn check(context: &str, path: &str, schema: &Value, value: &Value) -> Result<(), ValidationError> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(options) => options
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(ValidationError::new(
                context,
                path,
                format!("expected type {}", expected),
            ));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(ValidationError::new(context, path, "value not allowed by enum"));
        }
    }

    if let (Some(min), Some(s)) = (schema.get("minLength").and_then(Value::as_u64), value.as_str()) {
        if (s.chars().count() as u64) < min {
            return Err(ValidationError::new(
                context,
                path,
                format!("string shorter than {}", min),
            ));
        }
    }

    if let (Some(min), Some(n)) = (schema.get("minimum").and_then(Value::as_f64), value.as_f64()) {
        if n < min {
            return Err(ValidationError::new(
                context,
                path,
                format!("number below minimum {}", min),
            ));
        }
    }

    if let Value::Object(fields) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(key) {
                    return Err(ValidationError::new(
                        context,
                        format!("{}/{}", path, key),
                        "required property missing",
                    ));
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (key, sub_schema) in properties {
                if let Some(field) = fields.get(key) {
                    check(context, &format!("{}/{}", path, key), sub_schema, field)?;
                }
            }
        }
    }

    if let (Some(items), Value::Array(values)) = (schema.get("items"), value) {
        for (i, item) in values.iter().enumerate() {
            check(context, &format!("{}/{}", path, i), items, item)?;
        }
    }

    Ok(())
}

impl SchemaValidator for BasicSchemaValidator {
    fn assert_payload_schema(
        &self,
        context: &str,
        schema: &Value,
        payload: &Payload,
    ) -> Result<(), ValidationError> {
        check(context, "", schema, &Value::Object(payload.clone()))
    }

    fn assert_response_type_schema(
        &self,
        context: &str,
        schema: &Value,
    ) -> Result<(), ValidationError> {
        let Some(obj) = schema.as_object() else {
            return Err(ValidationError::new(context, "", "schema must be an object"));
        };
        match obj.get("type") {
            Some(Value::String(t)) if TYPES.contains(&t.as_str()) => Ok(()),
            Some(Value::Array(options))
                if !options.is_empty()
                    && options
                        .iter()
                        .all(|t| t.as_str().map(|t| TYPES.contains(&t)).unwrap_or(false)) =>
            {
                Ok(())
            }
            Some(other) => Err(ValidationError::new(
                context,
                "",
                format!("unsupported response type {}", other),
            )),
            None => Err(ValidationError::new(
                context,
                "",
                "response type schema needs a type",
            )),
        }
    }

    fn assert_response(
        &self,
        context: &str,
        schema: &Value,
        response: &Value,
    ) -> Result<(), ValidationError> {
        check(context, "", schema, response)
    }
}
