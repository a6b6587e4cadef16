//! OCM Mutation Pipeline
//!
//! Takes a resource (a tar archive of YAML manifests), applies one
//! transformation, and pushes the result into a content-addressed cache.
//!
//! # Transformations
//!
//! - **Configure**: override values cascade into configuration rules
//! - **Localize**: image references of component resources are substituted
//! - **Patch**: a strategic merge patch from a git source is applied
//! - **Passthrough**: the source is published unchanged
//!
//! # Example
//!
//! ```rust,ignore
//! use ocm_mutation::prelude::*;
//!
//! let mutator = Mutator::new(config, components, objects, sources, cache);
//! let outcome = mutator.mutate(&object).await?;
//! println!("{} -> {}", outcome.identity.component_name, outcome.digest);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod collaborators;
pub mod compression;
pub mod config;
pub mod configdata;
pub mod error;
pub mod evaluator;
pub mod merge;
pub mod patch;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod substitution;
pub mod types;
pub mod worktree;

mod yaml;

pub use collaborators::{ComponentVersionFetcher, DynamicObjectFetcher, SourceResolver};
pub use config::MutationConfig;
pub use configdata::ConfigData;
pub use error::{
    CompileError, ConfigError, ErrorKind, FetchError, MutationError, PatchError, ResolveError,
    Stage, StageError, WorkTreeError,
};
pub use pipeline::Mutator;
pub use resolver::DataResolver;
pub use substitution::{ConfigurationCompiler, LocalizationCompiler, Substitution};
pub use types::{
    MutationMode, MutationObject, MutationOutcome, ObjectReference, ResourceSelector, Snapshot,
    SourceRef,
};
pub use worktree::WorkingTree;

/// Prelude for convenient imports
pub mod prelude {
    //! Common imports for driving the pipeline
    pub use crate::{
        ComponentVersionFetcher, DynamicObjectFetcher, ErrorKind, FetchError, MutationConfig,
        MutationError, MutationObject, MutationOutcome, Mutator, ObjectReference,
        ResourceSelector, SourceRef, SourceResolver,
    };
    pub use ocm_cache::{Cache, MemoryCache};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
