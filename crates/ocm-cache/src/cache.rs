//! The cache capability

use crate::error::CacheError;
use ocm_artifact::{Digest, Identity};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest as _, Sha256};
use std::io::{Read, Write};

/// Owned byte stream handed to and returned from a cache
pub type BlobReader = Box<dyn Read + Send>;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("tag pattern is valid")
});

/// Content-addressed blob store
///
/// Blobs are addressed by an [`Identity`] plus either a mutable tag or an
/// immutable digest. Pushing under an existing `(identity, tag)` rebinds the
/// tag; previously returned digests stay fetchable.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Whether `tag` is bound under `identity`
    async fn is_cached(&self, identity: &Identity, tag: &str) -> Result<bool, CacheError>;

    /// Consume `data`, store it and bind `tag` to its digest
    async fn push_data(
        &self,
        data: BlobReader,
        identity: &Identity,
        tag: &str,
    ) -> Result<Digest, CacheError>;

    /// Fetch the blob currently bound to `tag`
    async fn fetch_data_by_identity(
        &self,
        identity: &Identity,
        tag: &str,
    ) -> Result<BlobReader, CacheError>;

    /// Fetch the blob stored under `digest`
    async fn fetch_data_by_digest(
        &self,
        identity: &Identity,
        digest: &Digest,
    ) -> Result<BlobReader, CacheError>;
}

/// Reject tags that cannot be used as tag names
///
/// # Errors
/// Returns [`CacheError::InvalidTag`] if the tag does not match
/// `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`
pub fn validate_tag(tag: &str) -> Result<(), CacheError> {
    if TAG_PATTERN.is_match(tag) {
        Ok(())
    } else {
        Err(CacheError::InvalidTag(tag.to_string()))
    }
}

/// Copy `reader` into `writer` while hashing, returning the digest and size
pub(crate) fn copy_hashed<W: Write>(
    mut reader: impl Read,
    writer: &mut W,
) -> std::io::Result<(Digest, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok((Digest::from_hasher(hasher), total))
}
