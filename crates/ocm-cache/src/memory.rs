//! In-memory cache backed by dashmap

use crate::cache::{copy_hashed, validate_tag, BlobReader, Cache};
use crate::error::CacheError;
use dashmap::DashMap;
use ocm_artifact::{Digest, Identity};
use std::io::Cursor;
use std::sync::Arc;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored blobs
    pub blob_count: usize,
    /// Number of tag bindings
    pub tag_count: usize,
}

/// Process-local [`Cache`]
///
/// Cloning shares the underlying maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    blobs: Arc<DashMap<(Identity, Digest), Arc<[u8]>>>,
    tags: Arc<DashMap<(Identity, String), Digest>>,
}

impl MemoryCache {
    /// Create empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get cache statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            blob_count: self.blobs.len(),
            tag_count: self.tags.len(),
        }
    }

    /// Digest currently bound to a tag
    #[must_use]
    pub fn tagged_digest(&self, identity: &Identity, tag: &str) -> Option<Digest> {
        self.tags
            .get(&(identity.clone(), tag.to_string()))
            .map(|d| d.value().clone())
    }

    fn blob(&self, identity: &Identity, digest: &Digest) -> Option<Arc<[u8]>> {
        self.blobs
            .get(&(identity.clone(), digest.clone()))
            .map(|b| Arc::clone(b.value()))
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn is_cached(&self, identity: &Identity, tag: &str) -> Result<bool, CacheError> {
        Ok(self.tags.contains_key(&(identity.clone(), tag.to_string())))
    }

    async fn push_data(
        &self,
        data: BlobReader,
        identity: &Identity,
        tag: &str,
    ) -> Result<Digest, CacheError> {
        validate_tag(tag)?;

        let (bytes, digest) = tokio::task::spawn_blocking(move || {
            let mut bytes = Vec::new();
            copy_hashed(data, &mut bytes).map(|(digest, _)| (bytes, digest))
        })
        .await??;

        let size = bytes.len();
        self.blobs
            .insert((identity.clone(), digest.clone()), Arc::from(bytes));
        self.tags
            .insert((identity.clone(), tag.to_string()), digest.clone());

        tracing::debug!(%identity, tag, %digest, size, "pushed blob to memory cache");
        Ok(digest)
    }

    async fn fetch_data_by_identity(
        &self,
        identity: &Identity,
        tag: &str,
    ) -> Result<BlobReader, CacheError> {
        let digest = self
            .tagged_digest(identity, tag)
            .ok_or_else(|| CacheError::not_found(identity, tag))?;
        self.fetch_data_by_digest(identity, &digest).await
    }

    async fn fetch_data_by_digest(
        &self,
        identity: &Identity,
        digest: &Digest,
    ) -> Result<BlobReader, CacheError> {
        let blob = self
            .blob(identity, digest)
            .ok_or_else(|| CacheError::not_found(identity, digest.as_str()))?;
        Ok(Box::new(Cursor::new(blob)))
    }
}
