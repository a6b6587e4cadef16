//! Cache error types

use ocm_artifact::{HashError, Identity};

/// Errors returned by [`Cache`](crate::Cache) implementations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No blob bound to the requested tag or digest
    #[error("blob not found for {identity} ({reference})")]
    NotFound { identity: String, reference: String },

    /// Tag is not a valid tag name
    #[error("invalid tag: '{0}'")]
    InvalidTag(String),

    /// Stored or requested digest is malformed
    #[error("invalid digest: '{0}'")]
    InvalidDigest(String),

    /// Identity could not be turned into a storage name
    #[error("failed to derive repository name: {0}")]
    Identity(#[from] HashError),

    /// Underlying storage failure
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Create not found error
    #[inline]
    pub fn not_found(identity: &Identity, reference: impl Into<String>) -> Self {
        Self::NotFound {
            identity: identity.to_string(),
            reference: reference.into(),
        }
    }

    /// Check if error is a missing binding
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::other(err))
    }
}
