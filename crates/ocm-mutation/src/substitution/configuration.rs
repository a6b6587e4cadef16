//! Configuration rule compiler
//!
//! Merges override values into the document defaults, validates the raw
//! overrides against the optional schema, and cascades the rule expressions
//! into concrete values.

use super::Substitution;
use crate::configdata::ConfigData;
use crate::error::CompileError;
use crate::evaluator::DocumentEvaluator;
use crate::schema::SchemaValidator;
use serde_json::{Map, Value};
use std::sync::Arc;

const TEMPLATE_NAME: &str = "adjustments";

/// Compiles the configuration section into substitution rules
#[derive(Clone)]
pub struct ConfigurationCompiler {
    evaluator: Arc<dyn DocumentEvaluator>,
    validator: Arc<dyn SchemaValidator>,
}

impl ConfigurationCompiler {
    /// Create compiler with the given evaluator and schema validator
    #[must_use]
    pub fn new(evaluator: Arc<dyn DocumentEvaluator>, validator: Arc<dyn SchemaValidator>) -> Self {
        Self {
            evaluator,
            validator,
        }
    }

    /// Compile rules for `values`
    ///
    /// # Errors
    /// Returns error if `values` is not an object, violates the schema, or
    /// any rule expression stays unresolved
    pub fn compile(
        &self,
        config: &ConfigData,
        values: &Value,
    ) -> Result<Vec<Substitution>, CompileError> {
        let section = &config.configuration;
        let overrides = values
            .as_object()
            .ok_or_else(|| CompileError::ValuesNotObject(type_name(values)))?;

        if let Some(schema) = section.schema.as_ref().filter(|s| !s.is_null()) {
            self.validator.validate(values, schema)?;
        }

        let mut template = merge_overrides(&section.defaults, overrides);

        let rules: Vec<Substitution> = section
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                Substitution::new(
                    format!("subst-{i}"),
                    rule.file.clone(),
                    rule.path.clone(),
                    rule.value.clone(),
                )
            })
            .collect();
        let adjustments = serde_json::to_value(&rules)
            .map_err(|e| CompileError::CascadeResult(e.to_string()))?;
        template.insert(TEMPLATE_NAME.to_string(), adjustments);

        let resolved = self
            .evaluator
            .cascade(TEMPLATE_NAME, Value::Object(template))
            .map_err(CompileError::Cascade)?;

        let adjustments = resolved
            .get(TEMPLATE_NAME)
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let compiled: Vec<Substitution> = serde_json::from_value(adjustments)
            .map_err(|e| CompileError::CascadeResult(e.to_string()))?;

        tracing::debug!(rules = compiled.len(), "compiled configuration rules");
        Ok(compiled)
    }
}

/// Overwrite defaults with overrides for keys the defaults declare
fn merge_overrides(defaults: &Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = defaults.clone();
    let mut dropped = Vec::new();
    for (key, value) in overrides {
        match merged.get_mut(key) {
            Some(slot) => *slot = value.clone(),
            None => dropped.push(key.as_str()),
        }
    }
    if !dropped.is_empty() {
        tracing::warn!(keys = ?dropped, "ignoring override values without a default");
    }
    merged
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
