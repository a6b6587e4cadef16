//! Pipeline configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default upper bound for a single file touched by a rule (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default bound on component reference nesting
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 10;

/// Mutation pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MutationConfig {
    /// Parent directory for working trees (system temp dir when unset)
    pub work_dir: Option<PathBuf>,
    /// Largest file a rule may rewrite, in bytes
    pub max_file_size: u64,
    /// Modification time stamped on every archive entry
    pub archive_mtime: u64,
    /// Whether produced archives are gzip-compressed
    pub compress_output: bool,
    /// Maximum nesting of component references when composing descriptors
    pub max_reference_depth: usize,
}

impl MutationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML document; missing keys keep their defaults
    ///
    /// # Errors
    /// Returns error if the document is malformed or a limit is zero
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits
    ///
    /// # Errors
    /// Returns error if `max_file_size` or `max_reference_depth` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size == 0 {
            return Err(ConfigError::Invalid("maxFileSize must be positive".into()));
        }
        if self.max_reference_depth == 0 {
            return Err(ConfigError::Invalid(
                "maxReferenceDepth must be positive".into(),
            ));
        }
        Ok(())
    }

    /// With working tree parent directory
    #[inline]
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// With maximum rule file size
    #[inline]
    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// With archive entry mtime
    #[inline]
    #[must_use]
    pub fn with_archive_mtime(mut self, mtime: u64) -> Self {
        self.archive_mtime = mtime;
        self
    }

    /// With or without gzip output
    #[inline]
    #[must_use]
    pub fn with_compress_output(mut self, compress: bool) -> Self {
        self.compress_output = compress;
        self
    }

    /// With maximum component reference depth
    #[inline]
    #[must_use]
    pub fn with_max_reference_depth(mut self, depth: usize) -> Self {
        self.max_reference_depth = depth;
        self
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            archive_mtime: 0,
            compress_output: true,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
        }
    }
}
