//! Configuration/localization document model
//!
//! ```yaml
//! kind: ConfigData
//! configuration:
//!   defaults:
//!     color: red
//!   schema:
//!     type: object
//!   rules:
//!   - value: (( color ))
//!     file: configmap.yaml
//!     path: data.PODINFO_UI_COLOR
//! localization:
//! - resource:
//!     name: image
//!   file: deploy.yaml
//!   image: spec.template.spec.containers[0].image
//! - file: deploy.yaml
//!   mapping:
//!     path: metadata.labels.version
//!     transform: |
//!       out: (( component.version ))
//! ```

use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parsed configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub configuration: Configuration,
    #[serde(default)]
    pub localization: Vec<LocalizationEntry>,
}

/// Configuration section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default)]
    pub rules: Vec<ConfigurationRule>,
}

/// Configuration rule; `value` is usually an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRule {
    pub value: Value,
    pub file: String,
    pub path: String,
}

/// Named resource of the component version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceName {
    pub name: String,
}

/// Custom-computed localization value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub path: String,
    pub transform: String,
}

/// Localization entry
///
/// Either names a resource and the target paths to fill from its image
/// reference, or carries a custom [`Mapping`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceName>,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Mapping>,
}

impl ConfigData {
    /// Parse a YAML (or JSON) document
    ///
    /// # Errors
    /// Returns [`CompileError::Unmarshal`] if the document is not a mapping
    /// or does not match the expected shape
    pub fn from_slice(data: &[u8]) -> Result<Self, CompileError> {
        let raw: serde_yaml::Value =
            serde_yaml::from_slice(data).map_err(|e| CompileError::Unmarshal(e.to_string()))?;
        if !raw.is_mapping() {
            return Err(CompileError::Unmarshal(
                "config data must be a YAML mapping".into(),
            ));
        }
        serde_yaml::from_value(raw).map_err(|e| CompileError::Unmarshal(e.to_string()))
    }
}
