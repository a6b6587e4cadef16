//! Container image references
//!
//! Parses `registry/repository:tag` and `registry/repository@digest` strings
//! into their components, applying the usual registry defaults.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Registry assumed when a reference names none
pub const DEFAULT_REGISTRY: &str = "index.docker.io";
/// Tag assumed when a reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

const DOCKER_HUB_ALIAS: &str = "docker.io";

/// Tag or digest of an image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageIdentifier {
    Tag(String),
    Digest(String),
}

/// Parsed container image reference
///
/// # Examples
/// ```
/// use ocm_artifact::ImageReference;
///
/// let r: ImageReference = "ghcr.io/stefanprodan/podinfo:6.3.5".parse().unwrap();
/// assert_eq!(r.registry(), "ghcr.io");
/// assert_eq!(r.repository(), "stefanprodan/podinfo");
/// assert_eq!(r.identifier(), "6.3.5");
/// assert_eq!(r.name(), "ghcr.io/stefanprodan/podinfo:6.3.5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    identifier: ImageIdentifier,
}

impl ImageReference {
    /// Registry host (with port, if any)
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry
    #[inline]
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag or digest string
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        match &self.identifier {
            ImageIdentifier::Tag(t) | ImageIdentifier::Digest(t) => t,
        }
    }

    /// Whether the reference is pinned by digest
    #[inline]
    #[must_use]
    pub fn is_digest(&self) -> bool {
        matches!(self.identifier, ImageIdentifier::Digest(_))
    }

    /// Fully qualified reference name
    #[must_use]
    pub fn name(&self) -> String {
        match &self.identifier {
            ImageIdentifier::Tag(t) => format!("{}/{}:{t}", self.registry, self.repository),
            ImageIdentifier::Digest(d) => format!("{}/{}@{d}", self.registry, self.repository),
        }
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name_part, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !valid_digest(digest) {
                    return Err(ReferenceError::InvalidDigest(s.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // a ':' after the last '/' separates the tag; earlier ones are ports
        let last_slash = name_part.rfind('/').map_or(0, |i| i + 1);
        let (path, tag) = match name_part[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                (&name_part[..split], Some(&name_part[split + 1..]))
            }
            None => (name_part, None),
        };

        let (registry, repository) = split_registry(path);
        if repository.is_empty() || !repository.split('/').all(valid_path_component) {
            return Err(ReferenceError::InvalidRepository(s.to_string()));
        }

        let identifier = match (digest, tag) {
            (Some(d), _) => ImageIdentifier::Digest(d),
            (None, Some(t)) => {
                if !valid_tag(t) {
                    return Err(ReferenceError::InvalidTag(s.to_string()));
                }
                ImageIdentifier::Tag(t.to_string())
            }
            (None, None) => ImageIdentifier::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            identifier,
        })
    }
}

fn split_registry(path: &str) -> (String, String) {
    let (registry, repository) = match path.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), path.to_string()),
    };

    let registry = if registry == DOCKER_HUB_ALIAS {
        DEFAULT_REGISTRY.to_string()
    } else {
        registry
    };

    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("library/{repository}")
    } else {
        repository
    };

    (registry, repository)
}

fn valid_path_component(component: &str) -> bool {
    !component.is_empty()
        && component
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._-".contains(&b))
        && component.bytes().next().is_some_and(|b| b.is_ascii_alphanumeric())
}

fn valid_tag(tag: &str) -> bool {
    let bytes = tag.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 128
        && (bytes[0].is_ascii_alphanumeric() || bytes[0] == b'_')
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || b"_.-".contains(b))
}

fn valid_digest(digest: &str) -> bool {
    digest.split_once(':').is_some_and(|(algorithm, hex_part)| {
        !algorithm.is_empty()
            && hex_part.len() >= 32
            && hex_part.bytes().all(|b| b.is_ascii_hexdigit())
    })
}

/// Image reference parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("empty image reference")]
    Empty,

    #[error("invalid repository in reference '{0}'")]
    InvalidRepository(String),

    #[error("invalid tag in reference '{0}'")]
    InvalidTag(String),

    #[error("invalid digest in reference '{0}'")]
    InvalidDigest(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DIGEST: &str = "sha256:7b4a4c1bfa1d1a4ed7fb4d8e6b8e2b4d4f0f4b2d0a8e6b8e2b4d4f0f4b2d0a8e";

    #[test]
    fn docker_hub_short_name() {
        let r: ImageReference = "nginx".parse().unwrap();
        assert_eq!(r.registry(), DEFAULT_REGISTRY);
        assert_eq!(r.repository(), "library/nginx");
        assert_eq!(r.identifier(), "latest");
        assert_eq!(r.name(), "index.docker.io/library/nginx:latest");
    }

    #[test]
    fn docker_io_alias_is_normalized() {
        let r: ImageReference = "docker.io/acme/app:1.2".parse().unwrap();
        assert_eq!(r.registry(), DEFAULT_REGISTRY);
        assert_eq!(r.repository(), "acme/app");
    }

    #[test]
    fn registry_with_port() {
        let r: ImageReference = "localhost:5000/podinfo/podinfo:6.3.5".parse().unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "podinfo/podinfo");
        assert_eq!(r.identifier(), "6.3.5");
    }

    #[test]
    fn digest_takes_precedence_over_tag() {
        let raw = format!("ghcr.io/acme/app:1.0@{DIGEST}");
        let r: ImageReference = raw.parse().unwrap();
        assert!(r.is_digest());
        assert_eq!(r.identifier(), DIGEST);
        assert_eq!(r.name(), format!("ghcr.io/acme/app@{DIGEST}"));
    }

    #[test]
    fn rejects_uppercase_repository() {
        assert!(matches!(
            "ghcr.io/Acme/app:1".parse::<ImageReference>(),
            Err(ReferenceError::InvalidRepository(_))
        ));
    }

    #[test]
    fn rejects_bad_digest() {
        assert!(matches!(
            "ghcr.io/acme/app@sha256:zz".parse::<ImageReference>(),
            Err(ReferenceError::InvalidDigest(_))
        ));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!("".parse::<ImageReference>(), Err(ReferenceError::Empty));
    }

    proptest! {
        #[test]
        fn qualified_references_keep_their_parts(
            registry in "[a-z]{1,8}\\.(com|net|dev)",
            repo in "[a-z][a-z0-9]{0,7}/[a-z][a-z0-9]{0,7}",
            tag in "[a-z0-9][a-z0-9.-]{0,9}",
        ) {
            let raw = format!("{registry}/{repo}:{tag}");
            let parsed: ImageReference = raw.parse().unwrap();
            prop_assert_eq!(parsed.registry(), registry.as_str());
            prop_assert_eq!(parsed.repository(), repo.as_str());
            prop_assert_eq!(parsed.identifier(), tag.as_str());
            prop_assert_eq!(parsed.name(), raw);
        }
    }
}
