//! Strategic merge patch engine
//!
//! Fetches the patch source archive, extracts it next to the base archive,
//! merges the patch file into the target file of the base tree, and derives
//! the identity of the result from the source revision.

use crate::collaborators::SourceResolver;
use crate::error::{PatchError, WorkTreeError};
use crate::merge::merge_into_documents;
use crate::types::{PatchStrategicMerge, SourceArtifact, SourceRef, GIT_REPOSITORY_KIND};
use crate::worktree::WorkingTree;
use crate::yaml;
use ocm_artifact::Identity;
use sha2::{Digest as _, Sha256};
use std::path::Path;
use std::sync::Arc;

const SUPPORTED_KINDS: &[&str] = &[GIT_REPOSITORY_KIND];

/// Fetched and verified patch source
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub artifact: SourceArtifact,
    pub data: Vec<u8>,
}

/// Applies strategic merge patches from external sources
#[derive(Clone)]
pub struct PatchEngine {
    resolver: Arc<dyn SourceResolver>,
}

impl PatchEngine {
    /// Create engine
    #[must_use]
    pub fn new(resolver: Arc<dyn SourceResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve and download the patch source, verifying its checksum
    ///
    /// # Errors
    /// Returns [`PatchError::UnsupportedKind`] for source kinds other than
    /// `GitRepository`, and fetch or checksum errors
    pub async fn fetch_source(&self, source: &SourceRef) -> Result<FetchedSource, PatchError> {
        if !SUPPORTED_KINDS.contains(&source.kind.as_str()) {
            return Err(PatchError::UnsupportedKind {
                name: source.name.clone(),
                kind: source.kind.clone(),
            });
        }

        let artifact = self
            .resolver
            .resolve(source)
            .await
            .map_err(|e| PatchError::Resolve {
                name: source.to_string(),
                source: e,
            })?;
        let data = self
            .resolver
            .fetch(&artifact)
            .await
            .map_err(PatchError::Fetch)?;
        verify_checksum(&artifact, &data)?;

        tracing::debug!(
            source = %source,
            revision = %artifact.revision,
            bytes = data.len(),
            "fetched patch source"
        );
        Ok(FetchedSource { artifact, data })
    }

    /// Merge the patch file into the base archive's target file
    ///
    /// Blocking; run off the async executor.
    ///
    /// # Errors
    /// Returns error if either archive is malformed, a path is missing, or
    /// the merge fails
    pub fn apply(
        base: &[u8],
        source: &FetchedSource,
        patch: &PatchStrategicMerge,
        work_dir: Option<&Path>,
        max_file_size: u64,
    ) -> Result<WorkingTree, PatchError> {
        let tree = WorkingTree::extract(base, work_dir)?;
        let patch_tree = WorkingTree::extract(&source.data, work_dir)?;

        let source_path = patch.source.path.as_str();
        let target_path = patch.target.path.as_str();

        let patch_content = patch_tree
            .read_file(source_path, max_file_size)
            .map_err(|e| missing_as(e, || PatchError::SourcePathMissing(source_path.into())))?;
        let target_content = tree
            .read_file(target_path, max_file_size)
            .map_err(|e| missing_as(e, || PatchError::TargetPathMissing(target_path.into())))?;

        let mut documents = yaml::parse_documents(&target_content).map_err(|source| {
            WorkTreeError::Parse {
                file: target_path.into(),
                source,
            }
        })?;
        let patches = yaml::parse_documents(&patch_content).map_err(|source| {
            WorkTreeError::Parse {
                file: source_path.into(),
                source,
            }
        })?;
        for patch in patches.into_iter().filter(|p| !p.is_null()) {
            merge_into_documents(&mut documents, patch)?;
        }

        let rendered = yaml::render_documents(&documents).map_err(|source| {
            WorkTreeError::Serialize {
                file: target_path.into(),
                source,
            }
        })?;
        tree.write_file(target_path, rendered.as_bytes())?;

        tracing::debug!(source_path, target_path, "applied strategic merge patch");
        Ok(tree)
    }
}

/// Identity of a patched result
#[must_use]
pub fn patch_identity(source: &SourceRef, artifact: &SourceArtifact, target_path: &str) -> Identity {
    Identity::new(
        source.name.clone(),
        artifact.revision.clone(),
        target_path,
        artifact.revision.clone(),
    )
}

fn missing_as(err: WorkTreeError, missing: impl FnOnce() -> PatchError) -> PatchError {
    match err {
        WorkTreeError::FileNotFound(_) => missing(),
        other => other.into(),
    }
}

fn verify_checksum(artifact: &SourceArtifact, data: &[u8]) -> Result<(), PatchError> {
    let Some(expected) = artifact.checksum.as_deref().filter(|c| !c.is_empty()) else {
        return Ok(());
    };
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    let actual = hex::encode(Sha256::digest(data));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PatchError::ChecksumMismatch {
            url: artifact.url.clone(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockSourceResolver;
    use crate::error::{ErrorKind, FetchError};
    use pretty_assertions::assert_eq;
    use tar::{Builder, Header};

    fn tar_of(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn artifact(checksum: Option<String>) -> SourceArtifact {
        SourceArtifact {
            url: "http://source/patch-repo.tar.gz".into(),
            revision: "main@sha1:6f3a".into(),
            checksum,
        }
    }

    fn resolver_serving(data: Vec<u8>, checksum: Option<String>) -> MockSourceResolver {
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_resolve()
            .returning(move |_| Ok(artifact(checksum.clone())));
        resolver
            .expect_fetch()
            .returning(move |_| Ok(data.clone()));
        resolver
    }

    const TARGET: &str = r"apiVersion: apps/v1
kind: Deployment
metadata:
  name: podinfo
spec:
  replicas: 1
  template:
    spec:
      containers:
      - name: podinfo
        image: ghcr.io/stefanprodan/podinfo:6.3.5
";

    const PATCH: &str = r"apiVersion: apps/v1
kind: Deployment
metadata:
  name: podinfo
spec:
  replicas: 2
  template:
    spec:
      containers:
      - name: podinfo
        imagePullPolicy: Always
      - name: sidecar
        image: busybox
";

    fn patch_spec() -> PatchStrategicMerge {
        PatchStrategicMerge::new(
            SourceRef::git_repository("patch-repo", "default"),
            "sites/eu-west-1/deployment.yaml",
            "merge-target/merge-target.yaml",
        )
    }

    #[tokio::test]
    async fn fetches_and_verifies_source() {
        let data = tar_of(&[("sites/eu-west-1/deployment.yaml", PATCH)]);
        let checksum = hex::encode(Sha256::digest(&data));
        let engine = PatchEngine::new(Arc::new(resolver_serving(data.clone(), Some(checksum))));
        let fetched = engine.fetch_source(&patch_spec().source.source_ref).await.unwrap();
        assert_eq!(fetched.data, data);
        assert_eq!(fetched.artifact.revision, "main@sha1:6f3a");
    }

    #[tokio::test]
    async fn checksum_mismatch_is_a_fetch_failure() {
        let data = tar_of(&[("a.yaml", "a: 1\n")]);
        let engine = PatchEngine::new(Arc::new(resolver_serving(data, Some("00".repeat(32)))));
        let err = engine
            .fetch_source(&patch_spec().source.source_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::ChecksumMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn only_git_repositories_are_supported() {
        let engine = PatchEngine::new(Arc::new(MockSourceResolver::new()));
        let source = SourceRef {
            kind: "Bucket".into(),
            name: "patches".into(),
            namespace: "default".into(),
        };
        let err = engine.fetch_source(&source).await.unwrap_err();
        assert_eq!(err.to_string(), "source `patches` kind 'Bucket' not supported");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn unresolvable_source_names_it() {
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Err(FetchError::not_found("GitRepository default/patch-repo")));
        let err = PatchEngine::new(Arc::new(resolver))
            .fetch_source(&patch_spec().source.source_ref)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to get source 'default/patch-repo': GitRepository default/patch-repo not found"
        );
    }

    #[test]
    fn merges_patch_into_target() {
        let base = tar_of(&[("merge-target/merge-target.yaml", TARGET)]);
        let source = FetchedSource {
            artifact: artifact(None),
            data: tar_of(&[("sites/eu-west-1/deployment.yaml", PATCH)]),
        };
        let tree = PatchEngine::apply(&base, &source, &patch_spec(), None, 1 << 20).unwrap();

        let content = tree
            .read_file("merge-target/merge-target.yaml", 1 << 20)
            .unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_slice(&content).unwrap();
        let containers = doc["spec"]["template"]["spec"]["containers"]
            .as_sequence()
            .unwrap();
        assert_eq!(doc["spec"]["replicas"], serde_yaml::Value::from(2));
        assert_eq!(containers.len(), 2);
        assert_eq!(
            containers[0]["imagePullPolicy"],
            serde_yaml::Value::from("Always")
        );
    }

    #[test]
    fn missing_paths_are_reported() {
        let base = tar_of(&[("other.yaml", TARGET)]);
        let source = FetchedSource {
            artifact: artifact(None),
            data: tar_of(&[("sites/eu-west-1/deployment.yaml", PATCH)]),
        };
        let err = PatchEngine::apply(&base, &source, &patch_spec(), None, 1 << 20).unwrap_err();
        assert!(matches!(err, PatchError::TargetPathMissing(ref p) if p == "merge-target/merge-target.yaml"));

        let base = tar_of(&[("merge-target/merge-target.yaml", TARGET)]);
        let source = FetchedSource {
            artifact: artifact(None),
            data: tar_of(&[("elsewhere.yaml", PATCH)]),
        };
        let err = PatchEngine::apply(&base, &source, &patch_spec(), None, 1 << 20).unwrap_err();
        assert!(matches!(err, PatchError::SourcePathMissing(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn linked_target_outside_the_tree_is_refused() {
        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("deployment.yaml");
        std::fs::write(&victim, TARGET).unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_cksum();
        builder
            .append_link(&mut header, "merge-target/merge-target.yaml", &victim)
            .unwrap();
        let base = builder.into_inner().unwrap();
        let source = FetchedSource {
            artifact: artifact(None),
            data: tar_of(&[("sites/eu-west-1/deployment.yaml", PATCH)]),
        };

        let err = PatchEngine::apply(&base, &source, &patch_spec(), None, 1 << 20).unwrap_err();
        assert!(matches!(err, PatchError::WorkTree(WorkTreeError::InvalidFilePath(_))));
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), TARGET);
    }

    #[test]
    fn identity_follows_source_revision() {
        let spec = patch_spec();
        let id = patch_identity(&spec.source.source_ref, &artifact(None), &spec.target.path);
        assert_eq!(
            id,
            Identity::new(
                "patch-repo",
                "main@sha1:6f3a",
                "merge-target/merge-target.yaml",
                "main@sha1:6f3a"
            )
        );
    }
}
