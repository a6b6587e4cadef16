//! Capabilities the pipeline consumes from its environment
//!
//! Cluster lookups, component repositories and patch sources are injected as
//! `Arc<dyn Trait>` so the orchestrator can be driven by fakes in tests.

use crate::error::FetchError;
use crate::types::{
    AccessContext, ComponentDescriptor, ComponentVersionRecord, DescriptorRef, ObjectReference,
    ResourceSelector, Snapshot, SourceArtifact, SourceRef,
};
use ocm_cache::BlobReader;
use serde_json::Value;

/// Access to reconciled component versions and their resources
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ComponentVersionFetcher: Send + Sync {
    /// Look up a reconciled component version object
    async fn get_component_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ComponentVersionRecord, FetchError>;

    /// Build an authenticated access context for the version's repository
    async fn authenticate(
        &self,
        record: &ComponentVersionRecord,
    ) -> Result<AccessContext, FetchError>;

    /// Open the content of a resource
    async fn get_resource(
        &self,
        context: &AccessContext,
        record: &ComponentVersionRecord,
        selector: &ResourceSelector,
    ) -> Result<BlobReader, FetchError>;

    /// Raw access specification of a named resource
    async fn get_resource_access(
        &self,
        context: &AccessContext,
        record: &ComponentVersionRecord,
        resource_name: &str,
    ) -> Result<Value, FetchError>;

    /// Fetch a component descriptor; `None` if it does not exist
    async fn get_component_descriptor(
        &self,
        reference: &DescriptorRef,
    ) -> Result<Option<ComponentDescriptor>, FetchError>;
}

/// Access to snapshot-publishing cluster objects
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DynamicObjectFetcher: Send + Sync {
    /// Snapshot name published in the object's status
    async fn get_snapshot_name(&self, reference: &ObjectReference) -> Result<String, FetchError>;

    /// Fetch a snapshot record
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot, FetchError>;
}

/// Access to external patch sources
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SourceResolver: Send + Sync {
    /// Resolve a source object to its latest artifact
    async fn resolve(&self, source: &SourceRef) -> Result<SourceArtifact, FetchError>;

    /// Download an artifact
    async fn fetch(&self, artifact: &SourceArtifact) -> Result<Vec<u8>, FetchError>;
}
