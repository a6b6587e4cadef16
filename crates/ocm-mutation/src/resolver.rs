//! Data resolver
//!
//! Turns an [`ObjectReference`] into bytes. Component version references
//! fetch a resource through the [`ComponentVersionFetcher`]; every other kind
//! is resolved through the snapshot it publishes and read back from the
//! [`Cache`]. Payloads are decompressed transparently.

use crate::collaborators::{ComponentVersionFetcher, DynamicObjectFetcher};
use crate::compression::read_decompressed;
use crate::error::{FetchFailure, ResolveError};
use crate::types::{ObjectReference, ResourceSelector, Snapshot};
use ocm_artifact::Identity;
use ocm_cache::{BlobReader, Cache};
use std::io;
use std::sync::Arc;

/// Resolves object references to their content
#[derive(Clone)]
pub struct DataResolver {
    components: Arc<dyn ComponentVersionFetcher>,
    objects: Arc<dyn DynamicObjectFetcher>,
    cache: Arc<dyn Cache>,
}

impl DataResolver {
    /// Create resolver
    #[must_use]
    pub fn new(
        components: Arc<dyn ComponentVersionFetcher>,
        objects: Arc<dyn DynamicObjectFetcher>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            components,
            objects,
            cache,
        }
    }

    /// Fetch and decompress the content behind `reference`
    ///
    /// # Errors
    /// Returns [`ResolveError::ResourceRef`] or [`ResolveError::Snapshot`]
    /// depending on the path taken
    pub async fn resolve(&self, reference: &ObjectReference) -> Result<Vec<u8>, ResolveError> {
        if reference.is_component_version() {
            self.from_component_version(reference)
                .await
                .map_err(ResolveError::ResourceRef)
        } else {
            self.from_snapshot(reference)
                .await
                .map_err(ResolveError::Snapshot)
        }
    }

    /// Identity of the content behind `reference`, without fetching it
    ///
    /// # Errors
    /// Returns [`ResolveError::Identity`] if the backing object cannot be found
    pub async fn resolve_identity(
        &self,
        reference: &ObjectReference,
    ) -> Result<Identity, ResolveError> {
        let identity = if reference.is_component_version() {
            let selector = selector(reference)?;
            let record = self
                .components
                .get_component_version(&reference.namespace, &reference.name)
                .await
                .map_err(FetchFailure::ComponentVersion)
                .map_err(ResolveError::Identity)?;
            Identity::new(
                record.descriptor.component,
                record.descriptor.version,
                selector.name.clone(),
                selector.version.clone(),
            )
        } else {
            self.snapshot(reference)
                .await
                .map_err(ResolveError::Identity)?
                .identity
        };
        Ok(identity)
    }

    async fn from_component_version(
        &self,
        reference: &ObjectReference,
    ) -> Result<Vec<u8>, FetchFailure> {
        let selector = reference
            .resource_ref
            .as_ref()
            .ok_or_else(|| FetchFailure::MissingSelector(reference.to_string()))?;
        let record = self
            .components
            .get_component_version(&reference.namespace, &reference.name)
            .await
            .map_err(FetchFailure::ComponentVersion)?;
        let context = self
            .components
            .authenticate(&record)
            .await
            .map_err(FetchFailure::Authentication)?;
        let reader = self
            .components
            .get_resource(&context, &record, selector)
            .await
            .map_err(FetchFailure::Resource)?;

        tracing::debug!(
            reference = %reference,
            resource = %selector.name,
            "fetched resource from component version"
        );
        read_all(reader).await
    }

    async fn from_snapshot(&self, reference: &ObjectReference) -> Result<Vec<u8>, FetchFailure> {
        let snapshot = self.snapshot(reference).await?;
        if !snapshot.is_ready() {
            return Err(FetchFailure::NotReady(snapshot.name));
        }
        let digest = snapshot
            .digest
            .as_ref()
            .ok_or_else(|| FetchFailure::MissingDigest(snapshot.name.clone()))?;
        let reader = self
            .cache
            .fetch_data_by_digest(&snapshot.identity, digest)
            .await
            .map_err(FetchFailure::Cache)?;

        tracing::debug!(
            reference = %reference,
            snapshot = %snapshot.name,
            digest = %digest,
            "fetched snapshot data from cache"
        );
        read_all(reader).await
    }

    async fn snapshot(&self, reference: &ObjectReference) -> Result<Snapshot, FetchFailure> {
        let name = self
            .objects
            .get_snapshot_name(reference)
            .await
            .map_err(FetchFailure::SnapshotName)?;
        self.objects
            .get_snapshot(&reference.namespace, &name)
            .await
            .map_err(FetchFailure::Snapshot)
    }
}

fn selector(reference: &ObjectReference) -> Result<&ResourceSelector, ResolveError> {
    reference
        .resource_ref
        .as_ref()
        .ok_or_else(|| ResolveError::Identity(FetchFailure::MissingSelector(reference.to_string())))
}

async fn read_all(reader: BlobReader) -> Result<Vec<u8>, FetchFailure> {
    tokio::task::spawn_blocking(move || read_decompressed(reader))
        .await
        .map_err(|e| FetchFailure::Decompress(io::Error::other(e)))?
        .map_err(FetchFailure::Decompress)
}
