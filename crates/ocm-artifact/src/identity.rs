//! Artifact identities
//!
//! An [`Identity`] names a versioned resource or derived artifact with a
//! fixed, closed set of keys. It is the logical half of every cache address.

use crate::hash::{ContentHash, HashError};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Key of the component name entry
pub const COMPONENT_NAME_KEY: &str = "component-name";
/// Key of the component version entry
pub const COMPONENT_VERSION_KEY: &str = "component-version";
/// Key of the resource name entry
pub const RESOURCE_NAME_KEY: &str = "resource-name";
/// Key of the resource version entry
pub const RESOURCE_VERSION_KEY: &str = "resource-version";

/// Closed set of identity keys, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentityKey {
    ComponentName,
    ComponentVersion,
    ResourceName,
    ResourceVersion,
}

impl IdentityKey {
    /// All keys in canonical order
    pub const ALL: [IdentityKey; 4] = [
        IdentityKey::ComponentName,
        IdentityKey::ComponentVersion,
        IdentityKey::ResourceName,
        IdentityKey::ResourceVersion,
    ];

    /// Wire name of the key
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ComponentName => COMPONENT_NAME_KEY,
            Self::ComponentVersion => COMPONENT_VERSION_KEY,
            Self::ResourceName => RESOURCE_NAME_KEY,
            Self::ResourceVersion => RESOURCE_VERSION_KEY,
        }
    }
}

impl Display for IdentityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a versioned resource or artifact
///
/// Two identities are equal iff all four key/value pairs match.
///
/// # Examples
/// ```
/// use ocm_artifact::Identity;
///
/// let id = Identity::new("github.com/acme/podinfo", "v1.0.0", "manifests", "1.0.0");
/// assert!(id.repository_name().unwrap().starts_with("sha-"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "component-name", default)]
    pub component_name: String,
    #[serde(rename = "component-version", default)]
    pub component_version: String,
    #[serde(rename = "resource-name", default)]
    pub resource_name: String,
    #[serde(rename = "resource-version", default)]
    pub resource_version: String,
}

impl Identity {
    /// Create identity from its four values
    #[must_use]
    pub fn new(
        component_name: impl Into<String>,
        component_version: impl Into<String>,
        resource_name: impl Into<String>,
        resource_version: impl Into<String>,
    ) -> Self {
        Self {
            component_name: component_name.into(),
            component_version: component_version.into(),
            resource_name: resource_name.into(),
            resource_version: resource_version.into(),
        }
    }

    /// Value for a key
    #[must_use]
    pub fn get(&self, key: IdentityKey) -> &str {
        match key {
            IdentityKey::ComponentName => &self.component_name,
            IdentityKey::ComponentVersion => &self.component_version,
            IdentityKey::ResourceName => &self.resource_name,
            IdentityKey::ResourceVersion => &self.resource_version,
        }
    }

    /// Iterate key/value pairs in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (IdentityKey, &str)> {
        IdentityKey::ALL.into_iter().map(move |k| (k, self.get(k)))
    }

    /// Keys whose value is empty
    #[must_use]
    pub fn missing_keys(&self) -> Vec<IdentityKey> {
        self.iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| k)
            .collect()
    }

    /// Deterministic storage name for this identity (`sha-<16 hex chars>`)
    ///
    /// # Errors
    /// Returns error if the identity cannot be serialized
    pub fn repository_name(&self) -> Result<String, HashError> {
        let hash = ContentHash::compute_serializable(self)?;
        Ok(format!("sha-{}", hash.short()))
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}
