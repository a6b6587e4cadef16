//! Built-in cascading evaluator
//!
//! Expressions are whole string nodes of the form `(( operand ... ))`. A
//! single operand yields its value unchanged (any JSON type); several operands
//! are concatenated as strings. References are resolved from the document
//! root. Evaluation repeats until no node makes progress, so expressions may
//! refer to other expressions in any order.

use super::expr::{self, Expression, Operand};
use super::{lookup, lookup_mut, named_path, DocumentEvaluator, MappingEvaluator};
use crate::error::{EvaluationError, UnresolvedNode};
use ocm_artifact::FieldPath;
use serde_json::Value;

/// Default [`DocumentEvaluator`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeEvaluator;

impl CascadeEvaluator {
    /// Create new evaluator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct Pending {
    path: FieldPath,
    expression: Expression,
}

enum Step {
    Resolved(Value),
    /// Depends on a node that is still pending
    Waiting(String),
    Failed(String),
}

fn collect(value: &Value, path: &FieldPath, out: &mut Vec<Pending>) -> Result<(), EvaluationError> {
    match value {
        Value::String(text) => {
            if let Some(expression) = expr::parse(text)? {
                out.push(Pending {
                    path: path.clone(),
                    expression,
                });
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                collect(child, &path.child(key.clone()), out)?;
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect(child, &path.index(i), out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn contains_expression(value: &Value) -> bool {
    match value {
        Value::String(text) => expr::is_expression(text),
        Value::Object(map) => map.values().any(contains_expression),
        Value::Array(items) => items.iter().any(contains_expression),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn evaluate(document: &Value, expression: &Expression) -> Step {
    let mut values = Vec::with_capacity(expression.operands.len());
    for operand in &expression.operands {
        match operand {
            Operand::Literal(v) => values.push(v.clone()),
            Operand::Reference { raw, path } => match lookup(document, path) {
                None => return Step::Failed(format!("*'{raw}' not found")),
                Some(v) if contains_expression(v) => {
                    return Step::Waiting(format!("*'{raw}' is unresolved"))
                }
                Some(v) => values.push(v.clone()),
            },
        }
    }

    if values.len() == 1 {
        return Step::Resolved(values.remove(0));
    }

    let mut joined = String::new();
    for (operand, value) in expression.operands.iter().zip(&values) {
        match scalar_text(value) {
            Some(text) => joined.push_str(&text),
            None => {
                let name = match operand {
                    Operand::Reference { raw, .. } => raw.as_str(),
                    Operand::Literal(_) => "literal",
                };
                return Step::Failed(format!("*cannot concatenate non-scalar value of '{name}'"));
            }
        }
    }
    Step::Resolved(Value::String(joined))
}

impl DocumentEvaluator for CascadeEvaluator {
    fn cascade(&self, template: &str, mut document: Value) -> Result<Value, EvaluationError> {
        let mut pending = Vec::new();
        collect(&document, &FieldPath::root(), &mut pending)?;
        tracing::debug!(template, nodes = pending.len(), "cascading template");

        loop {
            let mut progressed = false;
            let mut remaining = Vec::with_capacity(pending.len());
            for node in pending {
                match evaluate(&document, &node.expression) {
                    Step::Resolved(value) => {
                        if let Some(slot) = lookup_mut(&mut document, &node.path) {
                            *slot = value;
                        }
                        progressed = true;
                    }
                    Step::Waiting(_) | Step::Failed(_) => remaining.push(node),
                }
            }
            pending = remaining;
            if pending.is_empty() {
                return Ok(document);
            }
            if !progressed {
                break;
            }
        }

        let nodes = pending
            .iter()
            .map(|node| {
                let reason = match evaluate(&document, &node.expression) {
                    Step::Waiting(reason) | Step::Failed(reason) => reason,
                    Step::Resolved(_) => String::from("*unresolved"),
                };
                UnresolvedNode {
                    expression: node.expression.raw.clone(),
                    template: template.to_string(),
                    path: node.path.to_string(),
                    named_path: named_path(&document, &node.path),
                    reason,
                }
            })
            .collect();

        Err(EvaluationError::Unresolved {
            template: template.to_string(),
            nodes,
        })
    }
}

/// Default [`MappingEvaluator`]
///
/// The mapping is a YAML mapping that must define `out`; it is overlaid on the
/// scope document, cascaded, and the resolved `out` value is returned.
///
/// ```yaml
/// out: (( component.references.[0].component.version ))
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeMappingEvaluator {
    inner: CascadeEvaluator,
}

impl CascadeMappingEvaluator {
    /// Create new mapping evaluator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingEvaluator for CascadeMappingEvaluator {
    fn evaluate(&self, mapping: &str, scope: &Value) -> Result<Value, EvaluationError> {
        let transform: Value = serde_yaml::from_str(mapping)
            .map_err(|e| EvaluationError::InvalidMapping(e.to_string()))?;
        let Value::Object(transform) = transform else {
            return Err(EvaluationError::InvalidMapping(
                "transform must be a mapping".into(),
            ));
        };
        if !transform.contains_key("out") {
            return Err(EvaluationError::MissingOut);
        }

        let mut document = match scope {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        document.extend(transform);

        let mut resolved = self.inner.cascade("mapping", Value::Object(document))?;
        resolved
            .as_object_mut()
            .and_then(|map| map.remove("out"))
            .ok_or(EvaluationError::MissingOut)
    }
}
