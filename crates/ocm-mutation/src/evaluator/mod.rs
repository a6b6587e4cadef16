//! Template evaluation
//!
//! The configuration compiler resolves `(( expr ))` nodes through a
//! [`DocumentEvaluator`]; custom localization mappings go through a
//! [`MappingEvaluator`]. Both are injected; [`CascadeEvaluator`] and
//! [`CascadeMappingEvaluator`] are the built-in implementations.

mod cascade;
mod expr;

pub use cascade::{CascadeEvaluator, CascadeMappingEvaluator};

use crate::error::EvaluationError;
use ocm_artifact::{FieldPath, PathSegment};
use serde_json::Value;

/// Resolves every expression node of a document
pub trait DocumentEvaluator: Send + Sync {
    /// Return `document` with every expression replaced by its value
    ///
    /// # Errors
    /// Returns error on syntax errors or when nodes remain unresolved
    fn cascade(&self, template: &str, document: Value) -> Result<Value, EvaluationError>;
}

/// Computes a value from a mapping expression evaluated over a scope
pub trait MappingEvaluator: Send + Sync {
    /// Evaluate `mapping` with `scope` in view and return its `out` value
    ///
    /// # Errors
    /// Returns error if the mapping is malformed or cannot be resolved
    fn evaluate(&self, mapping: &str, scope: &Value) -> Result<Value, EvaluationError>;
}

/// Look up a path from the document root
pub(crate) fn lookup<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |current, segment| match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key),
            (Value::Array(items), seg) => seg.as_index().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Mutable lookup of an existing path
pub(crate) fn lookup_mut<'a>(root: &'a mut Value, path: &FieldPath) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (Value::Array(items), seg) => items.get_mut(seg.as_index()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a path with sequence entries named by their `name` field
///
/// `adjustments.[0].value` becomes `adjustments.name:subst-0.value` when the
/// first adjustment is named `subst-0`.
pub(crate) fn named_path(root: &Value, path: &FieldPath) -> String {
    let mut parts = Vec::with_capacity(path.len());
    let mut current = Some(root);
    for segment in path.segments() {
        let next = current.and_then(|v| match (v, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key),
            (Value::Array(items), seg) => seg.as_index().and_then(|i| items.get(i)),
            _ => None,
        });
        let name = match (current, segment) {
            (Some(Value::Array(_)), _) => next
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
                .map(|n| format!("name:{n}")),
            _ => None,
        };
        parts.push(name.unwrap_or_else(|| segment.to_string()));
        current = next;
    }
    parts.join(".")
}
