//! Substitution rules and their compilers

mod configuration;
mod localization;

pub use configuration::ConfigurationCompiler;
pub use localization::LocalizationCompiler;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compiled `(file, path, value)` instruction
///
/// Serialized with `id` as `name` so evaluators can label locations by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    #[serde(rename = "name")]
    pub id: String,
    pub file: String,
    pub path: String,
    pub value: Value,
}

impl Substitution {
    /// Create new rule
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        file: impl Into<String>,
        path: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            file: file.into(),
            path: path.into(),
            value: value.into(),
        }
    }
}
