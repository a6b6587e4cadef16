//! Error types for the mutation pipeline
//!
//! Every module has its own error enum; [`MutationError`] wraps them with the
//! pipeline [`Stage`] that failed. All errors classify into an [`ErrorKind`]
//! so a caller can decide on retries without matching on variants.

use ocm_artifact::{AccessError, HashError, PathError};
use ocm_cache::CacheError;
use std::fmt::{self, Display, Formatter};
use std::io;

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Payload or document could not be parsed
    InputFormat,
    /// Input parsed but violates a rule or schema
    Validation,
    /// A referenced object, file or blob does not exist
    NotFound,
    /// Transport or storage failure
    Transient,
    /// Requested capability is not supported
    Unsupported,
    /// The mutation object itself is inconsistent
    Configuration,
}

/// Pipeline stage an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveSource,
    ResolveConfig,
    Configure,
    Localize,
    Patch,
    Archive,
    CachePush,
}

impl Stage {
    /// Short stage label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ResolveSource => "resolve source",
            Self::ResolveConfig => "resolve config",
            Self::Configure => "configure",
            Self::Localize => "localize",
            Self::Patch => "patch",
            Self::Archive => "archive",
            Self::CachePush => "cache push",
        }
    }

    /// Message prefix used when the stage fails
    #[must_use]
    pub const fn context(self) -> &'static str {
        match self {
            Self::ResolveSource => "failed to get data for source ref",
            Self::ResolveConfig => "failed to get data for config ref",
            Self::Configure => "failed to configure resource",
            Self::Localize => "failed to localize resource",
            Self::Patch => "failed to apply strategic merge patch",
            Self::Archive => "failed to archive working tree",
            Self::CachePush => "failed to push blob to local registry",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Top-level pipeline error
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// Mutation object is inconsistent; raised before any I/O
    #[error("{0}")]
    InvalidObject(String),

    /// A pipeline stage failed
    #[error("{}: {source}", .stage.context())]
    Failed {
        stage: Stage,
        #[source]
        source: StageError,
    },
}

impl MutationError {
    /// Wrap a stage failure
    #[inline]
    pub fn at(stage: Stage, source: impl Into<StageError>) -> Self {
        Self::Failed {
            stage,
            source: source.into(),
        }
    }

    /// Create invalid object error
    #[inline]
    pub fn invalid_object(message: impl Into<String>) -> Self {
        Self::InvalidObject(message.into())
    }

    /// Stage that failed, if any
    #[inline]
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::InvalidObject(_) => None,
            Self::Failed { stage, .. } => Some(*stage),
        }
    }

    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidObject(_) => ErrorKind::Configuration,
            Self::Failed { source, .. } => source.kind(),
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::NotFound)
    }
}

/// Failure of a single stage
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    WorkTree(#[from] WorkTreeError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Configuration(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StageError {
    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolve(e) => e.kind(),
            Self::Compile(e) => e.kind(),
            Self::WorkTree(e) => e.kind(),
            Self::Patch(e) => e.kind(),
            Self::Cache(e) => cache_kind(e),
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Task(_) => ErrorKind::Transient,
        }
    }
}

fn cache_kind(err: &CacheError) -> ErrorKind {
    match err {
        CacheError::NotFound { .. } => ErrorKind::NotFound,
        CacheError::InvalidTag(_) | CacheError::InvalidDigest(_) => ErrorKind::Validation,
        CacheError::Identity(_) => ErrorKind::InputFormat,
        CacheError::Io(_) => ErrorKind::Transient,
    }
}

/// Errors reported by external collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("access method not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Transient(String),
}

impl FetchError {
    /// Create not found error
    #[inline]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create transient error
    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Validation,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Transient(_) => ErrorKind::Transient,
        }
    }
}

/// Data resolution errors, labelled by the path taken
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to fetch resource data from resource ref: {0}")]
    ResourceRef(#[source] FetchFailure),

    #[error("failed to fetch resource data from snapshot: {0}")]
    Snapshot(#[source] FetchFailure),

    #[error("failed to get identity: {0}")]
    Identity(#[source] FetchFailure),
}

impl ResolveError {
    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceRef(f) | Self::Snapshot(f) | Self::Identity(f) => f.kind(),
        }
    }
}

/// Individual data resolution failures
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("failed to get component version: {0}")]
    ComponentVersion(#[source] FetchError),

    #[error("failed to create authenticated client: {0}")]
    Authentication(#[source] FetchError),

    #[error("failed to fetch resource from resource ref: {0}")]
    Resource(#[source] FetchError),

    #[error("component version reference '{0}' has no resource selector")]
    MissingSelector(String),

    #[error("failed to get snapshot name: {0}")]
    SnapshotName(#[source] FetchError),

    #[error("failed to get snapshot: {0}")]
    Snapshot(#[source] FetchError),

    #[error("snapshot not ready: {0}")]
    NotReady(String),

    #[error("snapshot {0} has no digest")]
    MissingDigest(String),

    #[error("failed to construct name: {0}")]
    RepositoryName(#[from] HashError),

    #[error("failed to fetch data: {0}")]
    Cache(#[source] CacheError),

    #[error("failed to auto decompress: {0}")]
    Decompress(#[source] io::Error),
}

impl FetchFailure {
    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ComponentVersion(e)
            | Self::Authentication(e)
            | Self::Resource(e)
            | Self::SnapshotName(e)
            | Self::Snapshot(e) => e.kind(),
            Self::MissingSelector(_) => ErrorKind::Configuration,
            Self::NotReady(_) => ErrorKind::Transient,
            Self::MissingDigest(_) => ErrorKind::NotFound,
            Self::RepositoryName(_) | Self::Decompress(_) => ErrorKind::InputFormat,
            Self::Cache(e) => cache_kind(e),
        }
    }
}

/// Substitution rule compilation errors
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to unmarshal content: {0}")]
    Unmarshal(String),

    #[error("cannot unmarshal values: expected a JSON object, got {0}")]
    ValuesNotObject(&'static str),

    #[error("validation failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("configurator error: error while doing cascade with: {0}")]
    Cascade(#[source] EvaluationError),

    #[error("error unmarshaling result: {0}")]
    CascadeResult(String),

    #[error("failed to compile mapping: {0}")]
    Mapping(#[source] EvaluationError),

    #[error("failed to parse access reference: {0}")]
    Access(#[from] AccessError),

    #[error("failed to create authenticated client: {0}")]
    Authentication(#[source] FetchError),

    #[error("failed to fetch resource from component version: {0}")]
    Resource(#[source] FetchError),

    #[error("failed to get component descriptor: {0}")]
    Descriptor(#[source] FetchError),

    #[error("couldn't find component descriptor for reference '{0}' or any root components")]
    DescriptorNotFound(String),

    #[error("cannot retrieve component version for {0}")]
    NotComponentVersion(String),

    #[error("malformed component reference at {path}: {message}")]
    MalformedReference { path: String, message: String },

    #[error("component reference cycle detected at {0}")]
    ReferenceCycle(String),

    #[error("component references nested deeper than {0} levels")]
    ReferenceDepth(usize),
}

impl CompileError {
    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unmarshal(_) | Self::CascadeResult(_) | Self::MalformedReference { .. } => {
                ErrorKind::InputFormat
            }
            Self::ValuesNotObject(_)
            | Self::Schema(_)
            | Self::ReferenceCycle(_)
            | Self::ReferenceDepth(_) => ErrorKind::Validation,
            Self::Cascade(e) | Self::Mapping(e) => e.kind(),
            Self::Access(e) => match e {
                AccessError::Unsupported(_) | AccessError::NoGlobalAccess(_) => {
                    ErrorKind::Unsupported
                }
                _ => ErrorKind::InputFormat,
            },
            Self::Authentication(e) | Self::Resource(e) | Self::Descriptor(e) => e.kind(),
            Self::DescriptorNotFound(_) => ErrorKind::NotFound,
            Self::NotComponentVersion(_) => ErrorKind::Configuration,
        }
    }
}

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value
    pub instance_path: String,
    /// Human readable reason
    pub message: String,
}

impl Display for SchemaViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let path = if self.instance_path.is_empty() {
            "/"
        } else {
            &self.instance_path
        };
        write!(f, "{path}: {}", self.message)
    }
}

/// Schema validation errors
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("{}", join_violations(.0))]
    Violations(Vec<SchemaViolation>),
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A template node that could not be reduced to a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedNode {
    /// Raw expression text, e.g. `(( nope ))`
    pub expression: String,
    /// Template name
    pub template: String,
    /// Index-based location, e.g. `adjustments.[0].value`
    pub path: String,
    /// Name-based location, e.g. `adjustments.name:subst-0.value`
    pub named_path: String,
    /// Why the node is unresolved
    pub reason: String,
}

impl Display for UnresolvedNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\t{}\tin template {}\t{}\t({})\t{}",
            self.expression, self.template, self.path, self.named_path, self.reason
        )
    }
}

fn join_nodes(nodes: &[UnresolvedNode]) -> String {
    nodes.iter().map(|n| format!("\n{n}")).collect()
}

/// Expression evaluation errors
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("syntax error in '{expression}': {message}")]
    Syntax { expression: String, message: String },

    #[error("processing template {template}: unresolved nodes:{}", join_nodes(.nodes))]
    Unresolved {
        template: String,
        nodes: Vec<UnresolvedNode>,
    },

    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("mapping does not define 'out'")]
    MissingOut,
}

impl EvaluationError {
    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax { .. } | Self::InvalidMapping(_) => ErrorKind::InputFormat,
            Self::Unresolved { .. } | Self::MissingOut => ErrorKind::Validation,
        }
    }
}

/// Working tree errors
#[derive(Debug, thiserror::Error)]
pub enum WorkTreeError {
    #[error(
        "expected tarred directory content for configuration/localization resources, got plain text"
    )]
    NotAnArchive,

    #[error("tmp dir error: {0}")]
    TempDir(#[source] io::Error),

    #[error("extract tar error: {0}")]
    Extract(#[source] io::Error),

    #[error("invalid file path '{0}': must be relative and stay inside the working tree")]
    InvalidFilePath(String),

    #[error("localization substitution failed: {0}: no such file or directory")]
    FileNotFound(String),

    #[error("file '{file}' is {size} bytes, larger than the {limit} byte limit")]
    FileTooLarge { file: String, size: u64, limit: u64 },

    #[error("invalid path in rule for '{file}': {source}")]
    RulePath {
        file: String,
        #[source]
        source: PathError,
    },

    #[error("failed to parse '{file}': {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot set '{path}' in '{file}': {reason}")]
    SetPath {
        file: String,
        path: String,
        reason: String,
    },

    #[error("failed to serialize '{file}': {source}")]
    Serialize {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to create archive: {0}")]
    Archive(#[source] io::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl WorkTreeError {
    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAnArchive
            | Self::Extract(_)
            | Self::InvalidFilePath(_)
            | Self::RulePath { .. }
            | Self::Parse { .. }
            | Self::Serialize { .. } => ErrorKind::InputFormat,
            Self::FileNotFound(_) => ErrorKind::NotFound,
            Self::FileTooLarge { .. } | Self::SetPath { .. } => ErrorKind::Validation,
            Self::TempDir(_) | Self::Archive(_) | Self::Io(_) => ErrorKind::Transient,
        }
    }
}

/// Strategic merge errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("cannot merge {patch} into {base} at '{path}'")]
    TypeMismatch {
        path: String,
        base: &'static str,
        patch: &'static str,
    },

    #[error("unknown $patch directive '{directive}' at '{path}'")]
    InvalidDirective { path: String, directive: String },
}

/// Patch engine errors
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("source `{name}` kind '{kind}' not supported")]
    UnsupportedKind { name: String, kind: String },

    #[error("unable to get source '{name}': {source}")]
    Resolve {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to fetch source artifact: {0}")]
    Fetch(#[source] FetchError),

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("patch source path '{0}' not found")]
    SourcePathMissing(String),

    #[error("patch target path '{0}' not found")]
    TargetPathMissing(String),

    #[error("strategic merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error(transparent)]
    WorkTree(#[from] WorkTreeError),
}

impl PatchError {
    /// Error classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedKind { .. } => ErrorKind::Unsupported,
            Self::Resolve { source, .. } | Self::Fetch(source) => source.kind(),
            Self::ChecksumMismatch { .. } => ErrorKind::Transient,
            Self::SourcePathMissing(_) | Self::TargetPathMissing(_) => ErrorKind::NotFound,
            Self::Merge(MergeError::TypeMismatch { .. }) => ErrorKind::Validation,
            Self::Merge(MergeError::InvalidDirective { .. }) => ErrorKind::InputFormat,
            Self::WorkTree(e) => e.kind(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid mutation config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid mutation config: {0}")]
    Invalid(String),
}
