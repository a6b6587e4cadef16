//! Core data types
//!
//! Boundary types shared by the resolver, compiler, patch engine and
//! orchestrator. All of them round-trip through serde using the camelCase
//! field names of the cluster objects they mirror.

use crate::error::MutationError;
use ocm_artifact::{Digest, Identity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};

/// Kind of references resolved through the component version fetcher
pub const COMPONENT_VERSION_KIND: &str = "ComponentVersion";

/// Only patch source kind currently supported
pub const GIT_REPOSITORY_KIND: &str = "GitRepository";

/// Selects one resource of a component version
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Names of component references to follow from the root component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_path: Vec<String>,
}

impl ResourceSelector {
    /// Select a resource by name and version
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            reference_path: Vec::new(),
        }
    }

    /// With a reference path into nested components
    #[must_use]
    pub fn with_reference_path(mut self, path: Vec<String>) -> Self {
        self.reference_path = path;
        self
    }
}

/// Reference to an object that yields bytes
///
/// `ComponentVersion` references are resolved through the component version
/// fetcher and need a resource selector; any other kind is resolved through
/// the snapshot it publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ResourceSelector>,
}

impl ObjectReference {
    /// Reference to any snapshot-publishing object
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: None,
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            resource_ref: None,
        }
    }

    /// Reference to a resource of a component version
    #[must_use]
    pub fn component_version(
        name: impl Into<String>,
        namespace: impl Into<String>,
        selector: ResourceSelector,
    ) -> Self {
        Self {
            resource_ref: Some(selector),
            ..Self::new(COMPONENT_VERSION_KIND, name, namespace)
        }
    }

    /// With API version
    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Whether this reference goes through the component version fetcher
    #[inline]
    #[must_use]
    pub fn is_component_version(&self) -> bool {
        self.kind == COMPONENT_VERSION_KIND
    }
}

impl Display for ObjectReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Reference to an external patch source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl SourceRef {
    /// Reference a git repository source
    #[must_use]
    pub fn git_repository(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: GIT_REPOSITORY_KIND.to_string(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl Display for SourceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Where the patch comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSource {
    pub source_ref: SourceRef,
    pub path: String,
}

/// Which file in the base archive receives the patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchTarget {
    pub path: String,
}

/// Strategic merge patch descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchStrategicMerge {
    pub source: PatchSource,
    pub target: PatchTarget,
}

impl PatchStrategicMerge {
    /// Patch `target_path` with the file at `source_path` of `source_ref`
    #[must_use]
    pub fn new(
        source_ref: SourceRef,
        source_path: impl Into<String>,
        target_path: impl Into<String>,
    ) -> Self {
        Self {
            source: PatchSource {
                source_ref,
                path: source_path.into(),
            },
            target: PatchTarget {
                path: target_path.into(),
            },
        }
    }
}

/// Resolved artifact of a patch source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceArtifact {
    pub url: String,
    pub revision: String,
    /// Hex sha256 of the artifact, when the source publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Source selection of a mutation object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ResourceSelector>,
}

/// Declarative mutation request as handed over by the reconciliation harness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationObject {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
    /// Component version that `source.resourceRef` selects from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_version_ref: Option<String>,
    #[serde(default)]
    pub source: MutationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_strategic_merge: Option<PatchStrategicMerge>,
    /// Name of the snapshot record produced on success
    #[serde(default)]
    pub snapshot_name: String,
}

impl MutationObject {
    /// Create object with no source selected yet
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, generation: i64) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            generation,
            ..Self::default()
        }
    }

    /// With an explicit source reference
    #[must_use]
    pub fn with_source_ref(mut self, reference: ObjectReference) -> Self {
        self.source.source_ref = Some(reference);
        self
    }

    /// With a resource of the object's component version as source
    #[must_use]
    pub fn with_resource_ref(
        mut self,
        component_version: impl Into<String>,
        selector: ResourceSelector,
    ) -> Self {
        self.component_version_ref = Some(component_version.into());
        self.source.resource_ref = Some(selector);
        self
    }

    /// With a configuration/localization document reference
    #[must_use]
    pub fn with_config_ref(mut self, reference: ObjectReference) -> Self {
        self.config_ref = Some(reference);
        self
    }

    /// With configuration override values
    #[must_use]
    pub fn with_values(mut self, values: Value) -> Self {
        self.values = Some(values);
        self
    }

    /// With a strategic merge patch
    #[must_use]
    pub fn with_patch(mut self, patch: PatchStrategicMerge) -> Self {
        self.patch_strategic_merge = Some(patch);
        self
    }

    /// With output snapshot name
    #[must_use]
    pub fn with_snapshot_name(mut self, name: impl Into<String>) -> Self {
        self.snapshot_name = name.into();
        self
    }

    /// Cache tag for this object's output (its generation)
    #[inline]
    #[must_use]
    pub fn tag(&self) -> String {
        self.generation.to_string()
    }

    /// Normalize into a [`MutationSpec`]
    ///
    /// # Errors
    /// Returns a configuration error if no source is selected, or a resource
    /// is selected without a component version
    pub fn spec(&self) -> Result<MutationSpec, MutationError> {
        let source_ref = match (&self.source.source_ref, &self.source.resource_ref) {
            (Some(reference), _) => reference.clone(),
            (None, Some(selector)) => {
                let component_version = self.component_version_ref.as_ref().ok_or_else(|| {
                    MutationError::invalid_object(
                        "resourceRef requires a component version reference",
                    )
                })?;
                ObjectReference::component_version(
                    component_version.clone(),
                    self.namespace.clone(),
                    selector.clone(),
                )
            }
            (None, None) => {
                return Err(MutationError::invalid_object(
                    "either sourceRef or resourceRef should be defined, but both are empty",
                ))
            }
        };

        Ok(MutationSpec {
            source_ref,
            config_ref: self.config_ref.clone(),
            values: self.values.clone(),
            patch_strategic_merge: self.patch_strategic_merge.clone(),
        })
    }
}

/// Normalized mutation request
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSpec {
    pub source_ref: ObjectReference,
    pub config_ref: Option<ObjectReference>,
    pub values: Option<Value>,
    pub patch_strategic_merge: Option<PatchStrategicMerge>,
}

/// Transformation selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    Configure,
    Localize,
    Patch,
    Passthrough,
}

impl MutationSpec {
    /// Select the transformation from the populated fields
    ///
    /// # Errors
    /// Returns a configuration error when a config reference and a patch are
    /// both present, or values are given without a config reference
    pub fn mode(&self) -> Result<MutationMode, MutationError> {
        match (&self.config_ref, &self.values, &self.patch_strategic_merge) {
            (Some(_), _, Some(_)) => Err(MutationError::invalid_object(
                "configRef and patchStrategicMerge are mutually exclusive",
            )),
            (None, Some(_), _) => Err(MutationError::invalid_object(
                "values require a configRef",
            )),
            (Some(_), Some(_), None) => Ok(MutationMode::Configure),
            (Some(_), None, None) => Ok(MutationMode::Localize),
            (None, None, Some(_)) => Ok(MutationMode::Patch),
            (None, None, None) => Ok(MutationMode::Passthrough),
        }
    }
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Published record of a cached blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub name: String,
    pub namespace: String,
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub ready: ConditionStatus,
}

impl Snapshot {
    /// Whether the snapshot's readiness condition is true
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready == ConditionStatus::True
    }
}

/// Versions observed during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationStatus {
    #[serde(default)]
    pub latest_source_version: String,
    #[serde(default)]
    pub latest_config_version: String,
    #[serde(default)]
    pub latest_patch_source_version: String,
}

/// Result of a successful mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub identity: Identity,
    pub digest: Digest,
    pub tag: String,
    pub status: MutationStatus,
    pub snapshot: Snapshot,
}

/// Locates a component descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorRef {
    pub namespace: String,
    pub component: String,
    pub version: String,
    /// Name of the stored descriptor object, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DescriptorRef {
    /// Reference a descriptor by component name and version
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        component: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            component: component.into(),
            version: version.into(),
            name: None,
        }
    }
}

impl Display for DescriptorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component, self.version)
    }
}

/// Reconciled component version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersionRecord {
    pub name: String,
    pub namespace: String,
    /// Component name, e.g. `github.com/acme/podinfo`
    pub component: String,
    pub reconciled_version: String,
    /// Root descriptor of the reconciled version
    pub descriptor: DescriptorRef,
}

/// Component descriptor content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub version: String,
    /// Descriptor spec (`resources`, `references`, ...)
    pub spec: Value,
}

/// Credentials and repository context for component access
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessContext {
    pub repository: String,
    pub credentials: Option<String>,
}
