//! Testing utilities for the OCM mutation workspace
//!
//! In-memory collaborators, archive builders and podinfo fixtures.

#![allow(missing_docs)]

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ocm_artifact::{Digest, Identity};
use ocm_cache::{BlobReader, Cache, CacheError, MemoryCache};
use ocm_mutation::types::{
    AccessContext, ComponentDescriptor, ComponentVersionRecord, ConditionStatus, DescriptorRef,
    ObjectReference, ResourceSelector, Snapshot, SourceArtifact, SourceRef,
};
use ocm_mutation::{ComponentVersionFetcher, DynamicObjectFetcher, FetchError, SourceResolver};
use parking_lot::RwLock;
use serde_json::{json, Value};
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

pub const NAMESPACE: &str = "default";
pub const PODINFO_COMPONENT: &str = "github.com/acme/podinfo";
pub const PODINFO_VERSION: &str = "v6.3.5";
pub const PODINFO_IMAGE: &str = "ghcr.io/stefanprodan/podinfo:6.3.5";

pub const PODINFO_CONFIGMAP: &str = r"apiVersion: v1
kind: ConfigMap
metadata:
  name: podinfo-config
data:
  PODINFO_UI_COLOR: cyan
  PODINFO_UI_MESSAGE: hello world
";

pub const PODINFO_DEPLOYMENT: &str = r"apiVersion: apps/v1
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

pub const PODINFO_PATCH: &str = r"apiVersion: apps/v1
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
        image: busybox:1.36
";

pub const PODINFO_CONFIG_DATA: &str = r"apiVersion: config.ocm.software/v1alpha1
kind: ConfigData
metadata:
  name: ocm-config
configuration:
  defaults:
    color: red
    message: Hello, world!
  schema:
    type: object
    additionalProperties: false
    properties:
      color:
        type: string
      message:
        type: string
  rules:
  - value: (( color ))
    file: configmap.yaml
    path: data.PODINFO_UI_COLOR
  - value: (( message ))
    file: configmap.yaml
    path: data.PODINFO_UI_MESSAGE
localization:
- resource:
    name: image
  file: deploy.yaml
  image: spec.template.spec.containers[0].image
";

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are no-ops
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Tar archive of `(path, content)` entries
pub fn tar_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// Gzip-compressed tar archive of `(path, content)` entries
pub fn tar_gz_archive(files: &[(&str, &str)]) -> Vec<u8> {
    gzip(&tar_archive(files))
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Regular files of a (possibly gzipped) tar archive keyed by path
pub fn read_archive(data: &[u8]) -> BTreeMap<String, String> {
    let raw = if data.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    } else {
        data.to_vec()
    };

    let mut archive = tar::Archive::new(Cursor::new(raw));
    let mut files = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        files.insert(path, content);
    }
    files
}

/// Read a cached blob back as archive contents
pub async fn cached_files(
    cache: &dyn Cache,
    identity: &Identity,
    digest: &Digest,
) -> BTreeMap<String, String> {
    let mut reader = cache.fetch_data_by_digest(identity, digest).await.unwrap();
    let mut data = Vec::new();
    reader.read_to_end(&mut data).unwrap();
    read_archive(&data)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `ociArtifact` access specification for an image
pub fn oci_access(image: &str) -> Value {
    json!({"type": "ociArtifact", "imageReference": image})
}

pub fn podinfo_record(name: &str) -> ComponentVersionRecord {
    ComponentVersionRecord {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
        component: PODINFO_COMPONENT.to_string(),
        reconciled_version: PODINFO_VERSION.to_string(),
        descriptor: DescriptorRef::new(NAMESPACE, PODINFO_COMPONENT, PODINFO_VERSION),
    }
}

pub fn descriptor(name: &str, version: &str, spec: Value) -> ComponentDescriptor {
    ComponentDescriptor {
        name: name.to_string(),
        version: version.to_string(),
        spec,
    }
}

/// `references` entry pointing at another component
pub fn component_reference(name: &str, component: &str, version: &str) -> Value {
    json!({"name": name, "componentName": component, "version": version})
}

#[derive(Default)]
struct ComponentState {
    records: HashMap<(String, String), ComponentVersionRecord>,
    resources: HashMap<String, Vec<u8>>,
    accesses: HashMap<String, Value>,
    descriptors: HashMap<(String, String), ComponentDescriptor>,
    calls: Vec<String>,
}

/// In-memory component repository
#[derive(Clone, Default)]
pub struct FakeComponents {
    state: Arc<RwLock<ComponentState>>,
}

impl FakeComponents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: ComponentVersionRecord) -> Self {
        self.state.write().records.insert(
            (record.namespace.clone(), record.name.clone()),
            record,
        );
        self
    }

    pub fn with_resource(self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.state
            .write()
            .resources
            .insert(name.to_string(), data.into());
        self
    }

    pub fn with_access(self, resource: &str, access: Value) -> Self {
        self.state
            .write()
            .accesses
            .insert(resource.to_string(), access);
        self
    }

    pub fn with_descriptor(self, descriptor: ComponentDescriptor) -> Self {
        self.state.write().descriptors.insert(
            (descriptor.name.clone(), descriptor.version.clone()),
            descriptor,
        );
        self
    }

    /// Operations invoked so far, e.g. `get_resource:manifests`
    pub fn calls(&self) -> Vec<String> {
        self.state.read().calls.clone()
    }

    fn record_call(&self, call: String) {
        self.state.write().calls.push(call);
    }
}

#[async_trait::async_trait]
impl ComponentVersionFetcher for FakeComponents {
    async fn get_component_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ComponentVersionRecord, FetchError> {
        self.record_call(format!("get_component_version:{name}"));
        self.state
            .read()
            .records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::not_found(format!("component version {namespace}/{name}")))
    }

    async fn authenticate(
        &self,
        record: &ComponentVersionRecord,
    ) -> Result<AccessContext, FetchError> {
        self.record_call(format!("authenticate:{}", record.name));
        Ok(AccessContext {
            repository: "ghcr.io/acme/components".to_string(),
            credentials: None,
        })
    }

    async fn get_resource(
        &self,
        _context: &AccessContext,
        _record: &ComponentVersionRecord,
        selector: &ResourceSelector,
    ) -> Result<BlobReader, FetchError> {
        self.record_call(format!("get_resource:{}", selector.name));
        let data = self
            .state
            .read()
            .resources
            .get(&selector.name)
            .cloned()
            .ok_or_else(|| FetchError::not_found(format!("resource {}", selector.name)))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn get_resource_access(
        &self,
        _context: &AccessContext,
        _record: &ComponentVersionRecord,
        resource_name: &str,
    ) -> Result<Value, FetchError> {
        self.record_call(format!("get_resource_access:{resource_name}"));
        self.state
            .read()
            .accesses
            .get(resource_name)
            .cloned()
            .ok_or_else(|| FetchError::not_found(format!("resource {resource_name}")))
    }

    async fn get_component_descriptor(
        &self,
        reference: &DescriptorRef,
    ) -> Result<Option<ComponentDescriptor>, FetchError> {
        self.record_call(format!("get_component_descriptor:{reference}"));
        Ok(self
            .state
            .read()
            .descriptors
            .get(&(reference.component.clone(), reference.version.clone()))
            .cloned())
    }
}

#[derive(Default)]
struct ObjectState {
    snapshot_names: HashMap<(String, String), String>,
    snapshots: HashMap<(String, String), Snapshot>,
}

/// In-memory cluster objects publishing snapshots
#[derive(Clone, Default)]
pub struct FakeObjects {
    state: Arc<RwLock<ObjectState>>,
}

impl FakeObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot published by `reference`
    pub fn publish(&self, reference: &ObjectReference, snapshot: Snapshot) {
        let mut state = self.state.write();
        state.snapshot_names.insert(
            (reference.kind.clone(), reference.name.clone()),
            snapshot.name.clone(),
        );
        state.snapshots.insert(
            (snapshot.namespace.clone(), snapshot.name.clone()),
            snapshot,
        );
    }

    /// Push `data` into `cache` and publish a ready snapshot for it
    pub async fn publish_data(
        &self,
        cache: &dyn Cache,
        reference: &ObjectReference,
        identity: Identity,
        data: Vec<u8>,
    ) -> Snapshot {
        let digest = cache
            .push_data(Box::new(Cursor::new(data)), &identity, "1")
            .await
            .unwrap();
        let snapshot = Snapshot {
            name: format!("{}-snapshot", reference.name),
            namespace: reference.namespace.clone(),
            identity,
            digest: Some(digest),
            tag: "1".to_string(),
            ready: ConditionStatus::True,
        };
        self.publish(reference, snapshot.clone());
        snapshot
    }
}

#[async_trait::async_trait]
impl DynamicObjectFetcher for FakeObjects {
    async fn get_snapshot_name(&self, reference: &ObjectReference) -> Result<String, FetchError> {
        self.state
            .read()
            .snapshot_names
            .get(&(reference.kind.clone(), reference.name.clone()))
            .cloned()
            .ok_or_else(|| FetchError::not_found(reference.to_string()))
    }

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot, FetchError> {
        self.state
            .read()
            .snapshots
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::not_found(format!("snapshot {namespace}/{name}")))
    }
}

/// In-memory patch sources
#[derive(Clone, Default)]
pub struct FakeSources {
    artifacts: Arc<RwLock<HashMap<String, (SourceArtifact, Vec<u8>)>>>,
}

impl FakeSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` for the named git repository with a matching checksum
    pub fn with_git_repository(self, name: &str, revision: &str, data: Vec<u8>) -> Self {
        let artifact = SourceArtifact {
            url: format!("http://source-controller/gitrepository/{NAMESPACE}/{name}/latest.tar.gz"),
            revision: revision.to_string(),
            checksum: Some(sha256_hex(&data)),
        };
        self.with_artifact(name, artifact, data)
    }

    pub fn with_artifact(self, name: &str, artifact: SourceArtifact, data: Vec<u8>) -> Self {
        self.artifacts
            .write()
            .insert(name.to_string(), (artifact, data));
        self
    }
}

#[async_trait::async_trait]
impl SourceResolver for FakeSources {
    async fn resolve(&self, source: &SourceRef) -> Result<SourceArtifact, FetchError> {
        self.artifacts
            .read()
            .get(&source.name)
            .map(|(artifact, _)| artifact.clone())
            .ok_or_else(|| FetchError::not_found(format!("{} {source}", source.kind)))
    }

    async fn fetch(&self, artifact: &SourceArtifact) -> Result<Vec<u8>, FetchError> {
        self.artifacts
            .read()
            .values()
            .find(|(a, _)| a.url == artifact.url)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| FetchError::not_found(artifact.url.clone()))
    }
}

/// Cache whose pushes fail; reads go to an inner [`MemoryCache`]
#[derive(Clone, Default)]
pub struct UnavailableCache {
    inner: MemoryCache,
}

impl UnavailableCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Cache for UnavailableCache {
    async fn is_cached(&self, identity: &Identity, tag: &str) -> Result<bool, CacheError> {
        self.inner.is_cached(identity, tag).await
    }

    async fn push_data(
        &self,
        _data: BlobReader,
        _identity: &Identity,
        _tag: &str,
    ) -> Result<Digest, CacheError> {
        Err(CacheError::Io(io::Error::other("registry unavailable")))
    }

    async fn fetch_data_by_identity(
        &self,
        identity: &Identity,
        tag: &str,
    ) -> Result<BlobReader, CacheError> {
        self.inner.fetch_data_by_identity(identity, tag).await
    }

    async fn fetch_data_by_digest(
        &self,
        identity: &Identity,
        digest: &Digest,
    ) -> Result<BlobReader, CacheError> {
        self.inner.fetch_data_by_digest(identity, digest).await
    }
}
