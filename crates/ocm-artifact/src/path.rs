//! Field paths for addressing within structured documents
//!
//! Provides [`FieldPath`], the dot-separated path used by substitution rules
//! (`spec.template.spec.containers[0].image`).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// One segment of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Mapping key; a key made only of digits also indexes sequences
    Key(String),
    /// Explicit sequence index (`[n]`)
    Index(usize),
}

impl PathSegment {
    /// Sequence index this segment addresses, if any
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Key(k) => k.parse().ok(),
        }
    }
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Path within a structured document
///
/// # Examples
/// - `data.PODINFO_UI_COLOR`
/// - `spec.template.spec.containers[0].image`
/// - `adjustments.[0].value`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// Create new path from segments
    #[inline]
    #[must_use]
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Empty path (document root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is the root
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a key segment, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(PathSegment::Key(key.into()));
        new
    }

    /// Append an index segment, returning new path
    #[inline]
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut new = self.clone();
        new.0.push(PathSegment::Index(index));
        new
    }

    /// Split into parent path and last segment
    #[must_use]
    pub fn split_last(&self) -> Option<(Self, &PathSegment)> {
        let (last, parent) = self.0.split_last()?;
        Some((Self(parent.to_vec()), last))
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for raw in s.split('.') {
            if raw.is_empty() {
                return Err(PathError::EmptySegment(s.to_string()));
            }
            parse_segment(raw, s, &mut segments)?;
        }
        Ok(Self(segments))
    }
}

/// Parse `key`, `[n]` or `key[n][m]` into segments
fn parse_segment(raw: &str, full: &str, out: &mut Vec<PathSegment>) -> Result<(), PathError> {
    let (key, mut rest) = match raw.find('[') {
        Some(pos) => (&raw[..pos], &raw[pos..]),
        None => (raw, ""),
    };
    if !key.is_empty() {
        if key.contains(']') {
            return Err(PathError::InvalidSegment(raw.to_string()));
        }
        out.push(PathSegment::Key(key.to_string()));
    }
    while !rest.is_empty() {
        let close = rest
            .find(']')
            .ok_or_else(|| PathError::InvalidSegment(raw.to_string()))?;
        let index = rest[1..close]
            .parse::<usize>()
            .map_err(|_| PathError::InvalidIndex {
                path: full.to_string(),
                segment: raw.to_string(),
            })?;
        out.push(PathSegment::Index(index));
        rest = &rest[close + 1..];
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(PathError::InvalidSegment(raw.to_string()));
        }
    }
    Ok(())
}

/// Path parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty segment in path '{0}'")]
    EmptySegment(String),

    #[error("invalid path segment: '{0}'")]
    InvalidSegment(String),

    #[error("invalid index '{segment}' in path '{path}'")]
    InvalidIndex { path: String, segment: String },
}
