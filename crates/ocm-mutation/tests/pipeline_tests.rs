//! End-to-end mutation runs against in-memory collaborators

use ocm_artifact::Identity;
use ocm_cache::{Cache, MemoryCache};
use ocm_mutation::types::{PatchStrategicMerge, SourceArtifact};
use ocm_mutation::{
    ErrorKind, MutationConfig, MutationObject, Mutator, ObjectReference, ResourceSelector,
    SourceRef, Stage,
};
use ocm_test_utils::{
    cached_files, component_reference, descriptor, init_tracing, oci_access, podinfo_record,
    tar_archive, tar_gz_archive, FakeComponents, FakeObjects, FakeSources, UnavailableCache,
    NAMESPACE, PODINFO_COMPONENT, PODINFO_CONFIGMAP, PODINFO_CONFIG_DATA, PODINFO_DEPLOYMENT,
    PODINFO_PATCH, PODINFO_VERSION,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const NEW_IMAGE: &str = "ghcr.io/acme/podinfo:6.4.0";

fn manifests() -> Vec<u8> {
    tar_gz_archive(&[
        ("configmap.yaml", PODINFO_CONFIGMAP),
        ("deploy.yaml", PODINFO_DEPLOYMENT),
    ])
}

fn components_with_config(config: &str) -> FakeComponents {
    FakeComponents::new()
        .with_record(podinfo_record("podinfo"))
        .with_resource("manifests", manifests())
        .with_resource("config", config.as_bytes().to_vec())
        .with_access("image", oci_access(NEW_IMAGE))
        .with_descriptor(descriptor(
            PODINFO_COMPONENT,
            PODINFO_VERSION,
            json!({"resources": [{"name": "image"}]}),
        ))
}

fn config_ref() -> ObjectReference {
    ObjectReference::component_version("podinfo", NAMESPACE, ResourceSelector::new("config", "1.0.0"))
}

fn config_identity() -> Identity {
    Identity::new(PODINFO_COMPONENT, PODINFO_VERSION, "config", "1.0.0")
}

fn source_object(name: &str, generation: i64) -> MutationObject {
    MutationObject::new(name, NAMESPACE, generation)
        .with_resource_ref("podinfo", ResourceSelector::new("manifests", "1.0.0"))
}

fn configure_object(generation: i64, values: serde_json::Value) -> MutationObject {
    source_object("podinfo-config", generation)
        .with_config_ref(config_ref())
        .with_values(values)
}

fn mutator(components: FakeComponents, cache: Arc<dyn Cache>) -> Mutator {
    mutator_with(components, FakeObjects::new(), FakeSources::new(), cache)
}

fn mutator_with(
    components: FakeComponents,
    objects: FakeObjects,
    sources: FakeSources,
    cache: Arc<dyn Cache>,
) -> Mutator {
    init_tracing();
    Mutator::new(
        MutationConfig::default(),
        Arc::new(components),
        Arc::new(objects),
        Arc::new(sources),
        cache,
    )
}

#[tokio::test]
async fn configure_applies_override_values() {
    let cache = MemoryCache::new();
    let mutator = mutator(
        components_with_config(PODINFO_CONFIG_DATA),
        Arc::new(cache.clone()),
    );
    let object = configure_object(
        999,
        json!({"color": "bittersweet", "message": "this is a new message"}),
    );

    let outcome = mutator.mutate(&object).await.unwrap();

    assert_eq!(outcome.tag, "999");
    assert_eq!(outcome.identity, config_identity());
    assert_eq!(outcome.status.latest_config_version, PODINFO_VERSION);
    assert_eq!(outcome.status.latest_source_version, PODINFO_VERSION);
    assert_eq!(outcome.snapshot.digest.as_ref(), Some(&outcome.digest));
    assert!(outcome.snapshot.is_ready());
    assert_eq!(outcome.snapshot.name, "podinfo-config-snapshot");
    assert_eq!(
        cache.tagged_digest(&config_identity(), "999"),
        Some(outcome.digest.clone())
    );

    let files = cached_files(&cache, &outcome.identity, &outcome.digest).await;
    assert!(files["configmap.yaml"]
        .contains("PODINFO_UI_COLOR: bittersweet\n  PODINFO_UI_MESSAGE: this is a new message\n"));
    assert_eq!(files["deploy.yaml"], PODINFO_DEPLOYMENT);
}

#[tokio::test]
async fn configure_keeps_defaults_for_missing_values() {
    let cache = MemoryCache::new();
    let mutator = mutator(
        components_with_config(PODINFO_CONFIG_DATA),
        Arc::new(cache.clone()),
    );

    let outcome = mutator
        .mutate(&configure_object(1, json!({"color": "teal"})))
        .await
        .unwrap();

    let files = cached_files(&cache, &outcome.identity, &outcome.digest).await;
    let configmap: serde_yaml::Value = serde_yaml::from_str(&files["configmap.yaml"]).unwrap();
    assert_eq!(configmap["data"]["PODINFO_UI_COLOR"], serde_yaml::Value::from("teal"));
    assert_eq!(
        configmap["data"]["PODINFO_UI_MESSAGE"],
        serde_yaml::Value::from("Hello, world!")
    );
}

#[tokio::test]
async fn identical_runs_produce_identical_digests() {
    let cache = MemoryCache::new();
    let mutator = mutator(
        components_with_config(PODINFO_CONFIG_DATA),
        Arc::new(cache.clone()),
    );
    let object = configure_object(5, json!({"color": "bittersweet"}));

    let first = mutator.mutate(&object).await.unwrap();
    let second = mutator.mutate(&object).await.unwrap();

    assert_eq!(first.digest, second.digest);
    assert_eq!(cache.stats().blob_count, 1);
}

#[tokio::test]
async fn concurrent_runs_do_not_interfere() {
    let cache = MemoryCache::new();
    let mutator = mutator(
        components_with_config(PODINFO_CONFIG_DATA),
        Arc::new(cache.clone()),
    );
    let red = configure_object(1, json!({"color": "red-ish"}));
    let blue = configure_object(2, json!({"color": "blue-ish"}));

    let (red, blue) = tokio::join!(mutator.mutate(&red), mutator.mutate(&blue));
    let (red, blue) = (red.unwrap(), blue.unwrap());

    assert_ne!(red.digest, blue.digest);
    let red_files = cached_files(&cache, &red.identity, &red.digest).await;
    let blue_files = cached_files(&cache, &blue.identity, &blue.digest).await;
    assert!(red_files["configmap.yaml"].contains("PODINFO_UI_COLOR: red-ish"));
    assert!(blue_files["configmap.yaml"].contains("PODINFO_UI_COLOR: blue-ish"));
    assert_eq!(cache.tagged_digest(&config_identity(), "1"), Some(red.digest));
    assert_eq!(cache.tagged_digest(&config_identity(), "2"), Some(blue.digest));
}

#[tokio::test]
async fn concurrent_runs_for_distinct_identities_stay_separate() {
    init_tracing();
    let work_dir = tempfile::tempdir().unwrap();
    let cache = MemoryCache::new();
    let components = components_with_config(PODINFO_CONFIG_DATA)
        .with_resource("config-eu", PODINFO_CONFIG_DATA.as_bytes().to_vec());
    let mutator = Mutator::new(
        MutationConfig::default().with_work_dir(work_dir.path()),
        Arc::new(components),
        Arc::new(FakeObjects::new()),
        Arc::new(FakeSources::new()),
        Arc::new(cache.clone()),
    );

    let us = configure_object(7, json!({"color": "red-ish"}));
    let eu = source_object("podinfo-config-eu", 7)
        .with_config_ref(ObjectReference::component_version(
            "podinfo",
            NAMESPACE,
            ResourceSelector::new("config-eu", "1.0.0"),
        ))
        .with_values(json!({"color": "blue-ish"}));

    let (us, eu) = tokio::join!(mutator.mutate(&us), mutator.mutate(&eu));
    let (us, eu) = (us.unwrap(), eu.unwrap());

    let eu_identity = Identity::new(PODINFO_COMPONENT, PODINFO_VERSION, "config-eu", "1.0.0");
    assert_eq!(us.identity, config_identity());
    assert_eq!(eu.identity, eu_identity);

    let us_files = cached_files(&cache, &us.identity, &us.digest).await;
    let eu_files = cached_files(&cache, &eu.identity, &eu.digest).await;
    assert!(us_files["configmap.yaml"].contains("PODINFO_UI_COLOR: red-ish"));
    assert!(eu_files["configmap.yaml"].contains("PODINFO_UI_COLOR: blue-ish"));

    assert_eq!(cache.tagged_digest(&config_identity(), "7"), Some(us.digest.clone()));
    assert_eq!(cache.tagged_digest(&eu_identity, "7"), Some(eu.digest.clone()));
    assert!(cache
        .fetch_data_by_digest(&eu_identity, &us.digest)
        .await
        .is_err());
    assert!(cache
        .fetch_data_by_digest(&config_identity(), &eu.digest)
        .await
        .is_err());

    let leftover: Vec<_> = std::fs::read_dir(work_dir.path()).unwrap().collect();
    assert!(leftover.is_empty(), "working trees left behind: {leftover:?}");
}

#[tokio::test]
async fn unresolvable_expression_fails_configure() {
    let config = r"configuration:
  rules:
  - value: (( nope ))
    file: configmap.yaml
    path: data.PODINFO_UI_COLOR
";
    let cache = MemoryCache::new();
    let mutator = mutator(components_with_config(config), Arc::new(cache.clone()));

    let err = mutator
        .mutate(&configure_object(1, json!({})))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with(
        "failed to configure resource: configurator error: error while doing cascade with: processing template adjustments: unresolved nodes:"
    ));
    assert!(message.contains("(( nope ))"));
    assert_eq!(err.stage(), Some(Stage::Configure));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(cache.stats().blob_count, 0);
}

#[tokio::test]
async fn rule_for_missing_file_fails_configure() {
    let config = r"configuration:
  defaults:
    color: red
  rules:
  - value: (( color ))
    file: nope.yaml
    path: data.PODINFO_UI_COLOR
";
    let cache = MemoryCache::new();
    let mutator = mutator(components_with_config(config), Arc::new(cache.clone()));

    let err = mutator
        .mutate(&configure_object(1, json!({"color": "blue"})))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to configure resource: localization substitution failed: nope.yaml: no such file or directory"
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(cache.stats().blob_count, 0);
    assert_eq!(cache.stats().tag_count, 0);
}

#[tokio::test]
async fn plain_text_source_cannot_be_configured() {
    let components = components_with_config(PODINFO_CONFIG_DATA)
        .with_resource("manifests", b"just some text".to_vec());
    let mutator = mutator(components, Arc::new(MemoryCache::new()));

    let err = mutator
        .mutate(&configure_object(1, json!({"color": "blue"})))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to configure resource: expected tarred directory content for configuration/localization resources, got plain text"
    );
    assert_eq!(err.kind(), ErrorKind::InputFormat);
}

#[tokio::test]
async fn schema_violation_is_reported() {
    let mutator = mutator(
        components_with_config(PODINFO_CONFIG_DATA),
        Arc::new(MemoryCache::new()),
    );

    let err = mutator
        .mutate(&configure_object(1, json!({"color": 42})))
        .await
        .unwrap_err();

    assert!(err
        .to_string()
        .starts_with("failed to configure resource: validation failed:"));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn empty_source_is_rejected() {
    let components = components_with_config(PODINFO_CONFIG_DATA).with_resource("manifests", Vec::new());
    let mutator = mutator(components, Arc::new(MemoryCache::new()));

    let err = mutator.mutate(&source_object("empty", 1)).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to get data for source ref: source resource data cannot be empty"
    );
    assert_eq!(err.stage(), Some(Stage::ResolveSource));
}

#[tokio::test]
async fn object_without_source_fails_before_any_lookup() {
    let components = components_with_config(PODINFO_CONFIG_DATA);
    let mutator = mutator(components.clone(), Arc::new(MemoryCache::new()));

    let err = mutator
        .mutate(&MutationObject::new("broken", NAMESPACE, 1))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "either sourceRef or resourceRef should be defined, but both are empty"
    );
    assert!(components.calls().is_empty());
}

#[tokio::test]
async fn passthrough_publishes_source_unchanged() {
    let payload = b"not an archive at all".to_vec();
    let components = components_with_config(PODINFO_CONFIG_DATA).with_resource("manifests", payload.clone());
    let cache = MemoryCache::new();
    let mutator = mutator(components, Arc::new(cache.clone()));

    let outcome = mutator.mutate(&source_object("raw", 7)).await.unwrap();

    assert_eq!(
        outcome.identity,
        Identity::new(PODINFO_COMPONENT, PODINFO_VERSION, "manifests", "1.0.0")
    );
    let mut reader = cache
        .fetch_data_by_digest(&outcome.identity, &outcome.digest)
        .await
        .unwrap();
    let mut stored = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut stored).unwrap();
    assert_eq!(stored, payload);
}

#[tokio::test]
async fn failed_push_is_reported() {
    let mutator = mutator(
        components_with_config(PODINFO_CONFIG_DATA),
        Arc::new(UnavailableCache::new()),
    );

    let err = mutator.mutate(&source_object("podinfo", 1)).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to push blob to local registry: cache I/O error: registry unavailable"
    );
    assert_eq!(err.stage(), Some(Stage::CachePush));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn localization_substitutes_image_reference() {
    let config = r"localization:
- resource:
    name: image
  file: deploy.yaml
  image: spec.template.spec.containers[0].image
";
    let cache = MemoryCache::new();
    let mutator = mutator(components_with_config(config), Arc::new(cache.clone()));
    let object = source_object("podinfo-localize", 3).with_config_ref(config_ref());

    let outcome = mutator.mutate(&object).await.unwrap();

    assert_eq!(outcome.identity, config_identity());
    let files = cached_files(&cache, &outcome.identity, &outcome.digest).await;
    let deploy: serde_yaml::Value = serde_yaml::from_str(&files["deploy.yaml"]).unwrap();
    assert_eq!(
        deploy["spec"]["template"]["spec"]["containers"][0]["image"],
        serde_yaml::Value::from(NEW_IMAGE)
    );
    assert_eq!(files["configmap.yaml"], PODINFO_CONFIGMAP);
}

#[tokio::test]
async fn localization_fills_only_named_parts() {
    let deploy = r"spec:
  image:
    registry: docker.io
    repository: library/podinfo
    tag: latest
";
    let config = r"localization:
- resource:
    name: image
  file: values.yaml
  repository: spec.image.repository
  tag: spec.image.tag
";
    let components = components_with_config(config)
        .with_resource("manifests", tar_archive(&[("values.yaml", deploy)]));
    let cache = MemoryCache::new();
    let mutator = mutator(components, Arc::new(cache.clone()));
    let object = source_object("values", 1).with_config_ref(config_ref());

    let outcome = mutator.mutate(&object).await.unwrap();

    let files = cached_files(&cache, &outcome.identity, &outcome.digest).await;
    let values: serde_yaml::Value = serde_yaml::from_str(&files["values.yaml"]).unwrap();
    assert_eq!(values["spec"]["image"]["registry"], serde_yaml::Value::from("docker.io"));
    assert_eq!(
        values["spec"]["image"]["repository"],
        serde_yaml::Value::from("acme/podinfo")
    );
    assert_eq!(values["spec"]["image"]["tag"], serde_yaml::Value::from("6.4.0"));
}

fn mapping_config() -> &'static str {
    r"localization:
- file: deploy.yaml
  mapping:
    path: metadata.labels.backend-version
    transform: |
      out: (( component.references.[0].component.version ))
"
}

#[tokio::test]
async fn custom_mapping_reads_nested_references() {
    let components = components_with_config(mapping_config())
        .with_descriptor(descriptor(
            PODINFO_COMPONENT,
            PODINFO_VERSION,
            json!({"references": [component_reference("backend", "github.com/acme/backend", "2.1.0")]}),
        ))
        .with_descriptor(descriptor("github.com/acme/backend", "2.1.0", json!({"resources": []})));
    let cache = MemoryCache::new();
    let mutator = mutator(components, Arc::new(cache.clone()));
    let object = source_object("mapping", 1).with_config_ref(config_ref());

    let outcome = mutator.mutate(&object).await.unwrap();

    let files = cached_files(&cache, &outcome.identity, &outcome.digest).await;
    let deploy: serde_yaml::Value = serde_yaml::from_str(&files["deploy.yaml"]).unwrap();
    assert_eq!(
        deploy["metadata"]["labels"]["backend-version"],
        serde_yaml::Value::from("2.1.0")
    );
}

#[tokio::test]
async fn reference_cycle_fails_localization() {
    let components = components_with_config(mapping_config())
        .with_descriptor(descriptor(
            PODINFO_COMPONENT,
            PODINFO_VERSION,
            json!({"references": [component_reference("backend", "github.com/acme/backend", "2.1.0")]}),
        ))
        .with_descriptor(descriptor(
            "github.com/acme/backend",
            "2.1.0",
            json!({"references": [component_reference("frontend", PODINFO_COMPONENT, PODINFO_VERSION)]}),
        ));
    let mutator = mutator(components, Arc::new(MemoryCache::new()));
    let object = source_object("mapping", 1).with_config_ref(config_ref());

    let err = mutator.mutate(&object).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        format!("failed to localize resource: component reference cycle detected at {PODINFO_COMPONENT}:{PODINFO_VERSION}")
    );
    assert_eq!(err.stage(), Some(Stage::Localize));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn localization_needs_component_version_config() {
    let cache = MemoryCache::new();
    let objects = FakeObjects::new();
    let reference = ObjectReference::new("Resource", "config", NAMESPACE);
    objects
        .publish_data(
            &cache,
            &reference,
            Identity::new(PODINFO_COMPONENT, PODINFO_VERSION, "config", "1.0.0"),
            PODINFO_CONFIG_DATA.as_bytes().to_vec(),
        )
        .await;
    let mutator = mutator_with(
        components_with_config(PODINFO_CONFIG_DATA),
        objects,
        FakeSources::new(),
        Arc::new(cache),
    );
    let object = source_object("podinfo", 1).with_config_ref(reference);

    let err = mutator.mutate(&object).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to localize resource: cannot retrieve component version for Resource/default/config"
    );
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

const PATCH_SOURCE: &str = "sites/eu-west-1/deployment.yaml";
const PATCH_TARGET: &str = "merge-target/merge-target.yaml";
const PATCH_REVISION: &str = "main@sha1:6f3a9e1";

async fn patch_setup(sources: FakeSources) -> (Mutator, MemoryCache, MutationObject) {
    let cache = MemoryCache::new();
    let objects = FakeObjects::new();
    let reference = ObjectReference::new("Resource", "deployment", NAMESPACE);
    objects
        .publish_data(
            &cache,
            &reference,
            Identity::new(PODINFO_COMPONENT, PODINFO_VERSION, "deployment", "1.0.0"),
            tar_gz_archive(&[(PATCH_TARGET, PODINFO_DEPLOYMENT)]),
        )
        .await;
    let mutator = mutator_with(FakeComponents::new(), objects, sources, Arc::new(cache.clone()));
    let object = MutationObject::new("podinfo-patch", NAMESPACE, 4)
        .with_source_ref(reference)
        .with_patch(PatchStrategicMerge::new(
            SourceRef::git_repository("patch-repo", NAMESPACE),
            PATCH_SOURCE,
            PATCH_TARGET,
        ));
    (mutator, cache, object)
}

fn patch_repository() -> Vec<u8> {
    tar_gz_archive(&[(PATCH_SOURCE, PODINFO_PATCH)])
}

#[tokio::test]
async fn strategic_merge_patch_is_applied() {
    let sources = FakeSources::new().with_git_repository("patch-repo", PATCH_REVISION, patch_repository());
    let (mutator, cache, object) = patch_setup(sources).await;

    let outcome = mutator.mutate(&object).await.unwrap();

    assert_eq!(
        outcome.identity,
        Identity::new("patch-repo", PATCH_REVISION, PATCH_TARGET, PATCH_REVISION)
    );
    assert_eq!(outcome.status.latest_patch_source_version, PATCH_REVISION);
    assert_eq!(outcome.status.latest_source_version, PODINFO_VERSION);

    let files = cached_files(&cache, &outcome.identity, &outcome.digest).await;
    let deploy: serde_yaml::Value = serde_yaml::from_str(&files[PATCH_TARGET]).unwrap();
    let containers = deploy["spec"]["template"]["spec"]["containers"]
        .as_sequence()
        .unwrap();
    assert_eq!(deploy["spec"]["replicas"], serde_yaml::Value::from(2));
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0]["imagePullPolicy"], serde_yaml::Value::from("Always"));
    assert_eq!(
        containers[0]["image"],
        serde_yaml::Value::from("ghcr.io/stefanprodan/podinfo:6.3.5")
    );
}

#[tokio::test]
async fn patch_checksum_mismatch_is_transient() {
    let artifact = SourceArtifact {
        url: "http://source-controller/patch-repo.tar.gz".to_string(),
        revision: PATCH_REVISION.to_string(),
        checksum: Some("0".repeat(64)),
    };
    let sources = FakeSources::new().with_artifact("patch-repo", artifact, patch_repository());
    let (mutator, cache, object) = patch_setup(sources).await;
    let blobs_before = cache.stats().blob_count;

    let err = mutator.mutate(&object).await.unwrap_err();

    assert!(err
        .to_string()
        .starts_with("failed to apply strategic merge patch: checksum mismatch for http://source-controller/patch-repo.tar.gz"));
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(cache.stats().blob_count, blobs_before);
}

#[tokio::test]
async fn unsupported_patch_source_kind() {
    let (mutator, _cache, mut object) = patch_setup(FakeSources::new()).await;
    if let Some(patch) = object.patch_strategic_merge.as_mut() {
        patch.source.source_ref.kind = "Bucket".to_string();
    }

    let err = mutator.mutate(&object).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to apply strategic merge patch: source `patch-repo` kind 'Bucket' not supported"
    );
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[tokio::test]
async fn patch_with_missing_target_fails() {
    let sources = FakeSources::new().with_git_repository("patch-repo", PATCH_REVISION, patch_repository());
    let (mutator, _cache, mut object) = patch_setup(sources).await;
    if let Some(patch) = object.patch_strategic_merge.as_mut() {
        patch.target.path = "elsewhere.yaml".to_string();
    }

    let err = mutator.mutate(&object).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to apply strategic merge patch: patch target path 'elsewhere.yaml' not found"
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
