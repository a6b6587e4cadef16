//! JSON Schema validation of configuration values

use crate::error::{SchemaError, SchemaViolation};
use jsonschema::JSONSchema;
use serde_json::Value;

/// Validates a value against a JSON Schema
pub trait SchemaValidator: Send + Sync {
    /// Validate `value` against `schema`
    ///
    /// # Errors
    /// Returns every violation, or an error if the schema itself is invalid
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), SchemaError>;
}

/// [`SchemaValidator`] backed by the `jsonschema` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl JsonSchemaValidator {
    /// Create new validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), SchemaError> {
        let compiled =
            JSONSchema::compile(schema).map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;

        let result = compiled.validate(value);
        match result {
            Ok(()) => Ok(()),
            Err(errors) => Err(SchemaError::Violations(
                errors
                    .map(|e| SchemaViolation {
                        instance_path: e.instance_path.to_string(),
                        message: e.to_string(),
                    })
                    .collect(),
            )),
        }
    }
}
