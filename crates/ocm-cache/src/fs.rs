//! Filesystem-backed cache
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<repository>/blobs/sha256/<hex>
//! <root>/<repository>/tags/<tag>          (contains the bound digest)
//! ```
//!
//! `<repository>` is [`Identity::repository_name`]. Every file is written to
//! a temporary file in its target directory and renamed into place, so
//! readers never observe a partial blob or tag.

use crate::cache::{copy_hashed, validate_tag, BlobReader, Cache};
use crate::error::CacheError;
use ocm_artifact::{Digest, Identity};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// [`Cache`] persisted to a local directory
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    /// Open (creating if needed) a cache rooted at `root`
    ///
    /// # Errors
    /// Returns error if the root directory cannot be created
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the cache
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repository(&self, identity: &Identity) -> Result<PathBuf, CacheError> {
        Ok(self.root.join(identity.repository_name()?))
    }

    fn blob_path(repository: &Path, digest: &Digest) -> PathBuf {
        repository.join("blobs").join("sha256").join(digest.hex())
    }

    fn tag_path(repository: &Path, tag: &str) -> PathBuf {
        repository.join("tags").join(tag)
    }
}

fn read_tag(path: &Path) -> Result<Option<Digest>, CacheError> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let raw = raw.trim();
            raw.parse()
                .map(Some)
                .map_err(|_| CacheError::InvalidDigest(raw.to_string()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn open_blob(path: &Path, identity: &Identity, digest: &Digest) -> Result<BlobReader, CacheError> {
    match File::open(path) {
        Ok(file) => Ok(Box::new(file)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(CacheError::not_found(identity, digest.as_str()))
        }
        Err(err) => Err(err.into()),
    }
}

fn store(data: BlobReader, repository: &Path, tag: &str) -> Result<(Digest, u64), CacheError> {
    let blob_dir = repository.join("blobs").join("sha256");
    let tag_dir = repository.join("tags");
    fs::create_dir_all(&blob_dir)?;
    fs::create_dir_all(&tag_dir)?;

    let mut staged = NamedTempFile::new_in(&blob_dir)?;
    let (digest, size) = copy_hashed(data, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged
        .persist(LocalCache::blob_path(repository, &digest))
        .map_err(|e| e.error)?;

    let mut binding = NamedTempFile::new_in(&tag_dir)?;
    binding.write_all(digest.as_str().as_bytes())?;
    binding
        .persist(LocalCache::tag_path(repository, tag))
        .map_err(|e| e.error)?;

    Ok((digest, size))
}

#[async_trait::async_trait]
impl Cache for LocalCache {
    async fn is_cached(&self, identity: &Identity, tag: &str) -> Result<bool, CacheError> {
        if validate_tag(tag).is_err() {
            return Ok(false);
        }
        let path = Self::tag_path(&self.repository(identity)?, tag);
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn push_data(
        &self,
        data: BlobReader,
        identity: &Identity,
        tag: &str,
    ) -> Result<Digest, CacheError> {
        validate_tag(tag)?;
        let repository = self.repository(identity)?;
        let owned_tag = tag.to_string();

        let (digest, size) =
            tokio::task::spawn_blocking(move || store(data, &repository, &owned_tag)).await??;

        tracing::debug!(%identity, tag, %digest, size, "pushed blob to local cache");
        Ok(digest)
    }

    async fn fetch_data_by_identity(
        &self,
        identity: &Identity,
        tag: &str,
    ) -> Result<BlobReader, CacheError> {
        validate_tag(tag)?;
        let repository = self.repository(identity)?;
        let tag_path = Self::tag_path(&repository, tag);
        let id = identity.clone();
        let owned_tag = tag.to_string();

        tokio::task::spawn_blocking(move || {
            let digest = read_tag(&tag_path)?.ok_or_else(|| CacheError::not_found(&id, owned_tag))?;
            open_blob(&Self::blob_path(&repository, &digest), &id, &digest)
        })
        .await?
    }

    async fn fetch_data_by_digest(
        &self,
        identity: &Identity,
        digest: &Digest,
    ) -> Result<BlobReader, CacheError> {
        let path = Self::blob_path(&self.repository(identity)?, digest);
        let id = identity.clone();
        let digest = digest.clone();
        tokio::task::spawn_blocking(move || open_blob(&path, &id, &digest)).await?
    }
}
