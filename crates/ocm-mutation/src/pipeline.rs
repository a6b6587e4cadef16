//! Mutation pipeline orchestrator
//!
//! One invocation runs the stages strictly in sequence:
//!
//! `ResolveSource → ResolveConfig → Configure | Localize | Patch → Archive → CachePush`
//!
//! Any stage error aborts the run; working trees are removed on every path.

use crate::collaborators::{ComponentVersionFetcher, DynamicObjectFetcher, SourceResolver};
use crate::config::MutationConfig;
use crate::configdata::ConfigData;
use crate::error::{CompileError, MutationError, Stage, StageError};
use crate::evaluator::{CascadeEvaluator, CascadeMappingEvaluator, DocumentEvaluator, MappingEvaluator};
use crate::patch::{patch_identity, PatchEngine};
use crate::resolver::DataResolver;
use crate::schema::{JsonSchemaValidator, SchemaValidator};
use crate::substitution::{ConfigurationCompiler, LocalizationCompiler, Substitution};
use crate::types::{
    ConditionStatus, MutationMode, MutationObject, MutationOutcome, MutationSpec, MutationStatus,
    ObjectReference, Snapshot,
};
use crate::worktree::WorkingTree;
use ocm_artifact::Identity;
use ocm_cache::Cache;
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;

const EMPTY_SOURCE: &str = "source resource data cannot be empty";

/// Transformation result before archiving
enum Output {
    Tree(WorkingTree),
    Raw(Vec<u8>),
}

/// Runs mutation objects through the pipeline
#[derive(Clone)]
pub struct Mutator {
    config: MutationConfig,
    components: Arc<dyn ComponentVersionFetcher>,
    objects: Arc<dyn DynamicObjectFetcher>,
    sources: Arc<dyn SourceResolver>,
    cache: Arc<dyn Cache>,
    evaluator: Arc<dyn DocumentEvaluator>,
    mapping: Arc<dyn MappingEvaluator>,
    validator: Arc<dyn SchemaValidator>,
}

impl Mutator {
    /// Create mutator with the built-in evaluators and schema validator
    #[must_use]
    pub fn new(
        config: MutationConfig,
        components: Arc<dyn ComponentVersionFetcher>,
        objects: Arc<dyn DynamicObjectFetcher>,
        sources: Arc<dyn SourceResolver>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            config,
            components,
            objects,
            sources,
            cache,
            evaluator: Arc::new(CascadeEvaluator::new()),
            mapping: Arc::new(CascadeMappingEvaluator::new()),
            validator: Arc::new(JsonSchemaValidator::new()),
        }
    }

    /// With a custom document evaluator for configuration rules
    #[must_use]
    pub fn with_document_evaluator(mut self, evaluator: Arc<dyn DocumentEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// With a custom evaluator for localization mappings
    #[must_use]
    pub fn with_mapping_evaluator(mut self, mapping: Arc<dyn MappingEvaluator>) -> Self {
        self.mapping = mapping;
        self
    }

    /// With a custom schema validator
    #[must_use]
    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    fn resolver(&self) -> DataResolver {
        DataResolver::new(
            Arc::clone(&self.components),
            Arc::clone(&self.objects),
            Arc::clone(&self.cache),
        )
    }

    /// Run one mutation
    ///
    /// # Errors
    /// Returns [`MutationError::InvalidObject`] before any I/O if the object
    /// is inconsistent, otherwise the first stage failure
    pub async fn mutate(&self, object: &MutationObject) -> Result<MutationOutcome, MutationError> {
        let spec = object.spec()?;
        let mode = spec.mode()?;
        let resolver = self.resolver();
        let mut status = MutationStatus::default();

        tracing::debug!(object = %object.name, stage = %Stage::ResolveSource, ?mode, "resolving source");
        let source_data = resolver
            .resolve(&spec.source_ref)
            .await
            .map_err(|e| MutationError::at(Stage::ResolveSource, e))?;
        if source_data.is_empty() {
            return Err(MutationError::at(
                Stage::ResolveSource,
                StageError::Configuration(EMPTY_SOURCE.into()),
            ));
        }
        let source_identity = resolver
            .resolve_identity(&spec.source_ref)
            .await
            .map_err(|e| MutationError::at(Stage::ResolveSource, e))?;
        status.latest_source_version = source_identity.component_version.clone();

        let (output, identity) = match mode {
            MutationMode::Configure | MutationMode::Localize => {
                self.substitute(object, &spec, mode, &resolver, source_data, &mut status)
                    .await?
            }
            MutationMode::Patch => self.patch(object, &spec, source_data, &mut status).await?,
            MutationMode::Passthrough => {
                tracing::debug!(object = %object.name, "no transformation requested, passing source through");
                (Output::Raw(source_data), source_identity)
            }
        };

        tracing::debug!(object = %object.name, stage = %Stage::Archive, "archiving result");
        let data = match output {
            Output::Raw(data) => data,
            Output::Tree(tree) => {
                let (mtime, compress) = (self.config.archive_mtime, self.config.compress_output);
                tokio::task::spawn_blocking(move || tree.archive(mtime, compress))
                    .await
                    .map_err(|e| MutationError::at(Stage::Archive, e))?
                    .map_err(|e| MutationError::at(Stage::Archive, e))?
            }
        };

        let tag = object.tag();
        tracing::debug!(object = %object.name, stage = %Stage::CachePush, tag = %tag, "pushing result");
        let digest = self
            .cache
            .push_data(Box::new(Cursor::new(data)), &identity, &tag)
            .await
            .map_err(|e| MutationError::at(Stage::CachePush, e))?;
        tracing::info!(
            object = %object.name,
            identity = %identity,
            digest = %digest,
            "pushed mutation result"
        );

        let snapshot = Snapshot {
            name: snapshot_name(object),
            namespace: object.namespace.clone(),
            identity: identity.clone(),
            digest: Some(digest.clone()),
            tag: tag.clone(),
            ready: ConditionStatus::True,
        };
        Ok(MutationOutcome {
            identity,
            digest,
            tag,
            status,
            snapshot,
        })
    }

    async fn substitute(
        &self,
        object: &MutationObject,
        spec: &MutationSpec,
        mode: MutationMode,
        resolver: &DataResolver,
        source_data: Vec<u8>,
        status: &mut MutationStatus,
    ) -> Result<(Output, Identity), MutationError> {
        let Some(config_ref) = spec.config_ref.as_ref() else {
            return Err(MutationError::invalid_object("configRef is required"));
        };

        tracing::debug!(object = %object.name, stage = %Stage::ResolveConfig, "resolving config data");
        let config_data = resolver
            .resolve(config_ref)
            .await
            .map_err(|e| MutationError::at(Stage::ResolveConfig, e))?;
        let identity = resolver
            .resolve_identity(config_ref)
            .await
            .map_err(|e| MutationError::at(Stage::ResolveConfig, e))?;
        status.latest_config_version = identity.component_version.clone();

        let stage = if mode == MutationMode::Configure {
            Stage::Configure
        } else {
            Stage::Localize
        };
        tracing::debug!(object = %object.name, stage = %stage, "compiling substitution rules");

        let config = ConfigData::from_slice(&config_data).map_err(|e| MutationError::at(stage, e))?;
        let rules = match (mode, spec.values.as_ref()) {
            (MutationMode::Configure, Some(values)) => self.configuration_rules(&config, values),
            _ => self.localization_rules(config_ref, &config).await,
        }
        .map_err(|e| MutationError::at(stage, e))?;

        let work_dir = self.config.work_dir.clone();
        let max_file_size = self.config.max_file_size;
        let tree = tokio::task::spawn_blocking(move || {
            let tree = WorkingTree::extract(&source_data, work_dir.as_deref())?;
            tree.apply_rules(&rules, max_file_size)?;
            Ok::<_, crate::error::WorkTreeError>(tree)
        })
        .await
        .map_err(|e| MutationError::at(stage, e))?
        .map_err(|e| MutationError::at(stage, e))?;

        Ok((Output::Tree(tree), identity))
    }

    fn configuration_rules(
        &self,
        config: &ConfigData,
        values: &Value,
    ) -> Result<Vec<Substitution>, CompileError> {
        ConfigurationCompiler::new(Arc::clone(&self.evaluator), Arc::clone(&self.validator))
            .compile(config, values)
    }

    async fn localization_rules(
        &self,
        config_ref: &ObjectReference,
        config: &ConfigData,
    ) -> Result<Vec<Substitution>, CompileError> {
        if !config_ref.is_component_version() {
            return Err(CompileError::NotComponentVersion(config_ref.to_string()));
        }
        let record = self
            .components
            .get_component_version(&config_ref.namespace, &config_ref.name)
            .await
            .map_err(CompileError::Resource)?;

        let compiler = LocalizationCompiler::new(Arc::clone(&self.components), Arc::clone(&self.mapping))
            .with_max_depth(self.config.max_reference_depth);
        let reference_path = config_ref
            .resource_ref
            .as_ref()
            .map(|s| s.reference_path.as_slice())
            .unwrap_or_default();
        compiler.find_descriptor(&record, reference_path).await?;
        compiler.compile(&record, config).await
    }

    async fn patch(
        &self,
        object: &MutationObject,
        spec: &MutationSpec,
        source_data: Vec<u8>,
        status: &mut MutationStatus,
    ) -> Result<(Output, Identity), MutationError> {
        let Some(patch) = spec.patch_strategic_merge.clone() else {
            return Err(MutationError::invalid_object("patchStrategicMerge is required"));
        };

        tracing::debug!(object = %object.name, stage = %Stage::Patch, "fetching patch source");
        let engine = PatchEngine::new(Arc::clone(&self.sources));
        let fetched = engine
            .fetch_source(&patch.source.source_ref)
            .await
            .map_err(|e| MutationError::at(Stage::Patch, e))?;
        status.latest_patch_source_version = fetched.artifact.revision.clone();
        let identity = patch_identity(&patch.source.source_ref, &fetched.artifact, &patch.target.path);

        let work_dir = self.config.work_dir.clone();
        let max_file_size = self.config.max_file_size;
        let tree = tokio::task::spawn_blocking(move || {
            PatchEngine::apply(&source_data, &fetched, &patch, work_dir.as_deref(), max_file_size)
        })
        .await
        .map_err(|e| MutationError::at(Stage::Patch, e))?
        .map_err(|e| MutationError::at(Stage::Patch, e))?;

        Ok((Output::Tree(tree), identity))
    }
}

fn snapshot_name(object: &MutationObject) -> String {
    if object.snapshot_name.is_empty() {
        format!("{}-snapshot", object.name)
    } else {
        object.snapshot_name.clone()
    }
}
