//! OCM Content-Addressable Cache
//!
//! Stores derived artifacts keyed by a logical [`Identity`](ocm_artifact::Identity)
//! plus either a mutable tag or an immutable [`Digest`](ocm_artifact::Digest).
//!
//! # Implementations
//!
//! - [`MemoryCache`]: concurrent in-process maps, shared across clones
//! - [`LocalCache`]: directory layout with atomic renames
//!
//! # Example
//!
//! ```rust
//! use ocm_artifact::Identity;
//! use ocm_cache::{Cache, CacheError, MemoryCache};
//! use std::io::Cursor;
//!
//! # async fn run() -> Result<(), CacheError> {
//! let cache = MemoryCache::new();
//! let id = Identity::new("github.com/acme/podinfo", "v1", "manifests", "v1");
//! let digest = cache
//!     .push_data(Box::new(Cursor::new(b"data".to_vec())), &id, "1")
//!     .await?;
//! assert!(cache.is_cached(&id, "1").await?);
//! assert!(digest.as_str().starts_with("sha256:"));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cache;
mod error;
mod fs;
mod memory;

pub use cache::{validate_tag, BlobReader, Cache};
pub use error::CacheError;
pub use fs::LocalCache;
pub use memory::{CacheStats, MemoryCache};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
