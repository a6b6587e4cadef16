//! OCM Artifact Primitives
//!
//! Value types shared by the cache and the mutation pipeline.
//!
//! # Core Concepts
//!
//! - [`Identity`]: Closed four-key identity of a resource or derived artifact
//! - [`Digest`]: `sha256:<hex>` digest addressing immutable blobs
//! - [`ContentHash`]: 32-byte Blake3 hash used for stable storage names
//! - [`FieldPath`]: Dot-separated addressing within YAML/JSON documents
//! - [`ImageReference`]: Parsed `registry/repository:tag` references
//! - [`AccessSpec`]: Typed resource access specifications
//!
//! # Example
//!
//! ```rust
//! use ocm_artifact::{Digest, Identity};
//!
//! let id = Identity::new("github.com/acme/podinfo", "v6.3.5", "manifests", "1.0.0");
//! let repo = id.repository_name().unwrap();
//! let digest = Digest::of(b"payload");
//! println!("{repo}@{digest}");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod access;
mod hash;
mod identity;
mod path;
mod reference;

pub use access::{AccessError, AccessSpec, MAX_ALIAS_DEPTH};
pub use hash::{ContentHash, Digest, HashError, SHA256_PREFIX};
pub use identity::{
    Identity, IdentityKey, COMPONENT_NAME_KEY, COMPONENT_VERSION_KEY, RESOURCE_NAME_KEY,
    RESOURCE_VERSION_KEY,
};
pub use path::{FieldPath, PathError, PathSegment};
pub use reference::{ImageIdentifier, ImageReference, ReferenceError, DEFAULT_REGISTRY, DEFAULT_TAG};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
