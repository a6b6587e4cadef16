//! Localization rule compiler
//!
//! Entries naming a resource are filled from the image reference of that
//! resource's access specification. Entries with a custom mapping are
//! evaluated over the composed descriptor tree:
//!
//! ```yaml
//! component:
//!   name: github.com/acme/app
//!   version: 1.0.0
//!   references:
//!   - name: backend
//!     componentName: github.com/acme/backend
//!     version: 2.1.0
//!     component: { name: ..., version: ..., references: [...] }
//! ```

use super::Substitution;
use crate::collaborators::ComponentVersionFetcher;
use crate::config::DEFAULT_MAX_REFERENCE_DEPTH;
use crate::configdata::{ConfigData, LocalizationEntry};
use crate::error::CompileError;
use crate::evaluator::MappingEvaluator;
use crate::types::{AccessContext, ComponentDescriptor, ComponentVersionRecord, DescriptorRef};
use ocm_artifact::{AccessSpec, ImageReference};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const CUSTOM_RULE_ID: &str = "custom";

type PopulateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CompileError>> + Send + 'a>>;

/// Compiles the localization section into substitution rules
#[derive(Clone)]
pub struct LocalizationCompiler {
    fetcher: Arc<dyn ComponentVersionFetcher>,
    mapping: Arc<dyn MappingEvaluator>,
    max_depth: usize,
}

impl LocalizationCompiler {
    /// Create compiler
    #[must_use]
    pub fn new(fetcher: Arc<dyn ComponentVersionFetcher>, mapping: Arc<dyn MappingEvaluator>) -> Self {
        Self {
            fetcher,
            mapping,
            max_depth: DEFAULT_MAX_REFERENCE_DEPTH,
        }
    }

    /// Limit component reference nesting when composing descriptor trees
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Resolve the descriptor reached by following `reference_path` from the
    /// version's root descriptor
    ///
    /// # Errors
    /// Returns [`CompileError::DescriptorNotFound`] if the root or any
    /// referenced descriptor is missing
    pub async fn find_descriptor(
        &self,
        record: &ComponentVersionRecord,
        reference_path: &[String],
    ) -> Result<ComponentDescriptor, CompileError> {
        let mut current = self.fetch_descriptor(&record.descriptor).await?;
        for name in reference_path {
            let entry = references(&current.spec)
                .iter()
                .find(|r| r.get("name").and_then(Value::as_str) == Some(name.as_str()))
                .ok_or_else(|| {
                    CompileError::DescriptorNotFound(format!(
                        "{}/{}",
                        record.descriptor,
                        reference_path.join("/")
                    ))
                })?;
            let (component, version) = reference_target(entry, name)?;
            let target = DescriptorRef::new(record.namespace.clone(), component, version);
            current = self.fetch_descriptor(&target).await?;
        }
        Ok(current)
    }

    /// Compile rules for the version's localization section
    ///
    /// # Errors
    /// Returns error if a resource's access cannot be turned into an image
    /// reference, a mapping fails to evaluate, or the descriptor tree cannot
    /// be composed
    pub async fn compile(
        &self,
        record: &ComponentVersionRecord,
        config: &ConfigData,
    ) -> Result<Vec<Substitution>, CompileError> {
        let context = self
            .fetcher
            .authenticate(record)
            .await
            .map_err(CompileError::Authentication)?;

        let mut scope: Option<Value> = None;
        let mut rules = Vec::new();
        for entry in &config.localization {
            if let Some(mapping) = &entry.mapping {
                let document = match scope.take() {
                    Some(document) => document,
                    None => self.compose_descriptor_tree(record).await?,
                };
                let value = self
                    .mapping
                    .evaluate(&mapping.transform, &document)
                    .map_err(CompileError::Mapping)?;
                scope = Some(document);
                rules.push(Substitution::new(
                    CUSTOM_RULE_ID,
                    entry.file.clone(),
                    mapping.path.clone(),
                    value,
                ));
                continue;
            }

            let reference = self.image_reference(&context, record, entry).await?;
            rules.extend(image_rules(entry, &reference));
        }

        tracing::debug!(
            component = %record.descriptor,
            rules = rules.len(),
            "compiled localization rules"
        );
        Ok(rules)
    }

    /// Compose `{component: <root spec>}` with every reference's descriptor
    /// inlined under `component.references[i].component`
    ///
    /// # Errors
    /// Returns error on missing descriptors, malformed references, cycles, or
    /// nesting deeper than the configured limit
    pub async fn compose_descriptor_tree(
        &self,
        record: &ComponentVersionRecord,
    ) -> Result<Value, CompileError> {
        let root = self.fetch_descriptor(&record.descriptor).await?;
        let mut chain = vec![format!("{}:{}", root.name, root.version)];
        let mut component = descriptor_value(root);
        self.populate(
            &mut component,
            &record.namespace,
            "component".to_string(),
            0,
            &mut chain,
        )
        .await?;

        let mut tree = Map::new();
        tree.insert("component".into(), component);
        Ok(Value::Object(tree))
    }

    fn populate<'a>(
        &'a self,
        component: &'a mut Value,
        namespace: &'a str,
        location: String,
        depth: usize,
        chain: &'a mut Vec<String>,
    ) -> PopulateFuture<'a> {
        Box::pin(async move {
            let Some(Value::Array(entries)) = component.get_mut("references") else {
                return Ok(());
            };

            for (i, entry) in entries.iter_mut().enumerate() {
                let at = format!("{location}.references[{i}]");
                let (name, version) = reference_target(entry, &at)?;
                let key = format!("{name}:{version}");
                if chain.contains(&key) {
                    return Err(CompileError::ReferenceCycle(key));
                }
                if depth + 1 > self.max_depth {
                    return Err(CompileError::ReferenceDepth(self.max_depth));
                }

                let target = DescriptorRef::new(namespace, name, version);
                let mut child = descriptor_value(self.fetch_descriptor(&target).await?);

                chain.push(key);
                self.populate(
                    &mut child,
                    namespace,
                    format!("{at}.component"),
                    depth + 1,
                    chain,
                )
                .await?;
                chain.pop();

                if let Value::Object(map) = entry {
                    map.insert("component".into(), child);
                }
            }
            Ok(())
        })
    }

    async fn fetch_descriptor(
        &self,
        reference: &DescriptorRef,
    ) -> Result<ComponentDescriptor, CompileError> {
        self.fetcher
            .get_component_descriptor(reference)
            .await
            .map_err(CompileError::Descriptor)?
            .ok_or_else(|| CompileError::DescriptorNotFound(reference.to_string()))
    }

    async fn image_reference(
        &self,
        context: &AccessContext,
        record: &ComponentVersionRecord,
        entry: &LocalizationEntry,
    ) -> Result<ImageReference, CompileError> {
        let resource = entry.resource.as_ref().ok_or_else(|| {
            CompileError::Unmarshal(format!(
                "localization entry for '{}' names neither a resource nor a mapping",
                entry.file
            ))
        })?;
        let access = self
            .fetcher
            .get_resource_access(context, record, &resource.name)
            .await
            .map_err(CompileError::Resource)?;
        Ok(AccessSpec::from_value(&access)?.parse_reference()?)
    }
}

/// Rules for the target paths an entry names, identified by target kind
fn image_rules(entry: &LocalizationEntry, reference: &ImageReference) -> Vec<Substitution> {
    let targets = [
        ("registry", &entry.registry, reference.registry().to_string()),
        ("repository", &entry.repository, reference.repository().to_string()),
        ("image", &entry.image, reference.name()),
        ("tag", &entry.tag, reference.identifier().to_string()),
    ];
    targets
        .into_iter()
        .filter_map(|(id, path, value)| {
            path.as_deref()
                .filter(|p| !p.is_empty())
                .map(|p| Substitution::new(id, entry.file.clone(), p, value))
        })
        .collect()
}

fn references(spec: &Value) -> &[Value] {
    spec.get("references")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn reference_target<'v>(entry: &'v Value, at: &str) -> Result<(&'v str, &'v str), CompileError> {
    let field = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CompileError::MalformedReference {
                path: at.to_string(),
                message: format!("missing '{key}'"),
            })
    };
    Ok((field("componentName")?, field("version")?))
}

/// Descriptor spec with `name` and `version` filled in
fn descriptor_value(descriptor: ComponentDescriptor) -> Value {
    let mut map = match descriptor.spec {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.entry("name").or_insert(Value::String(descriptor.name));
    map.entry("version")
        .or_insert(Value::String(descriptor.version));
    Value::Object(map)
}
