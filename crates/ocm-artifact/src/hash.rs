//! Content hashing primitives
//!
//! Provides [`ContentHash`], a 32-byte blake3 hash used to derive stable
//! storage names, and [`Digest`], the OCI-style `sha256:<hex>` digest
//! returned by cache pushes and used for immutable lookups.

use sha2::{Digest as _, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte blake3 hash of a value's JSON encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a serializable value
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn compute_serializable<T>(value: &T) -> Result<Self, HashError>
    where
        T: serde::Serialize,
    {
        let json = serde_json::to_vec(value)?;
        Ok(Self(*blake3::hash(&json).as_bytes()))
    }

    /// First 16 hex chars
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

/// Digest algorithm prefix used for every digest produced by this workspace
pub const SHA256_PREFIX: &str = "sha256:";

/// OCI-style content digest (`sha256:<64 lowercase hex chars>`)
///
/// # Invariants
/// - Always carries the `sha256:` algorithm prefix
/// - The hex part is exactly 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(String);

impl Digest {
    /// Digest of a complete byte payload
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    /// Finish a running sha256 hasher into a digest
    #[must_use]
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{SHA256_PREFIX}{}", hex::encode(hasher.finalize())))
    }

    /// Hex part of the digest, without the algorithm prefix
    #[inline]
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0[SHA256_PREFIX.len()..]
    }

    /// Full digest string including the algorithm prefix
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| HashError::UnsupportedAlgorithm(s.to_string()))?;
        if hex_part.len() != 64 {
            return Err(HashError::InvalidLength {
                expected: 64,
                actual: hex_part.len(),
            });
        }
        if !hex_part
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(HashError::InvalidDigest(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when working with hashes and digests
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Invalid hash length
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Digest algorithm other than sha256
    #[error("unsupported digest algorithm in '{0}'")]
    UnsupportedAlgorithm(String),

    /// Digest with non-hex characters
    #[error("invalid digest: '{0}'")]
    InvalidDigest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
