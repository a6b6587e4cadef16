//! Strategic merge of YAML documents
//!
//! Mappings merge recursively and scalars override. Sequences of objects
//! merge element-wise by a merge key (`containers` by `name`, `ports` by
//! `containerPort`, ...); other sequences append. Patches may carry
//! `$patch: delete` or `$patch: replace` directives, and a `null` value
//! deletes the key.

use crate::error::MergeError;
use crate::yaml::type_name;
use serde_yaml::{Mapping, Value};

const DIRECTIVE_KEY: &str = "$patch";

/// Merge key per well-known sequence field
const MERGE_KEYS: &[(&str, &str)] = &[
    ("containers", "name"),
    ("initContainers", "name"),
    ("ephemeralContainers", "name"),
    ("volumes", "name"),
    ("env", "name"),
    ("imagePullSecrets", "name"),
    ("volumeMounts", "mountPath"),
    ("ports", "containerPort"),
    ("hostAliases", "ip"),
];

const FALLBACK_MERGE_KEY: &str = "name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Delete,
    Replace,
}

enum Merged {
    Keep(Value),
    Delete,
}

/// Merge `patch` into `base`
///
/// A top-level `$patch: delete` yields `null`.
///
/// # Errors
/// Returns [`MergeError::TypeMismatch`] when a mapping or sequence meets a
/// value of another shape, or [`MergeError::InvalidDirective`] for unknown
/// `$patch` values
pub fn strategic_merge(base: Value, patch: Value) -> Result<Value, MergeError> {
    match merge(Some(base), patch, "", "")? {
        Merged::Keep(value) => Ok(value),
        Merged::Delete => Ok(Value::Null),
    }
}

/// Merge `patch` into the matching document of a multi-document file
///
/// Documents are matched by `kind` and `metadata.name`; without a match the
/// first document is patched.
///
/// # Errors
/// See [`strategic_merge`]
pub fn merge_into_documents(documents: &mut Vec<Value>, patch: Value) -> Result<(), MergeError> {
    if documents.is_empty() {
        documents.push(Value::Null);
    }
    let index = document_key(&patch)
        .and_then(|key| {
            documents
                .iter()
                .position(|doc| document_key(doc).as_ref() == Some(&key))
        })
        .unwrap_or(0);

    let base = std::mem::replace(&mut documents[index], Value::Null);
    match merge(Some(base), patch, "", "")? {
        Merged::Keep(value) => documents[index] = value,
        Merged::Delete => {
            documents.remove(index);
        }
    }
    Ok(())
}

fn document_key(doc: &Value) -> Option<(String, String)> {
    let kind = doc.get("kind")?.as_str()?;
    let name = doc.get("metadata")?.get("name")?.as_str()?;
    Some((kind.to_string(), name.to_string()))
}

fn merge(base: Option<Value>, patch: Value, path: &str, field: &str) -> Result<Merged, MergeError> {
    match patch {
        Value::Mapping(patch) => merge_mapping(base, patch, path),
        Value::Sequence(patch) => merge_sequence(base, patch, path, field),
        scalar => match base {
            Some(base @ (Value::Mapping(_) | Value::Sequence(_))) => Err(mismatch(path, &base, &scalar)),
            _ => Ok(Merged::Keep(scalar)),
        },
    }
}

fn merge_mapping(base: Option<Value>, patch: Mapping, path: &str) -> Result<Merged, MergeError> {
    let (directive, patch) = take_directive(patch, path)?;
    match directive {
        Some(Directive::Delete) => return Ok(Merged::Delete),
        Some(Directive::Replace) => return merge_mapping(None, patch, path),
        None => {}
    }

    let mut merged = match base {
        None | Some(Value::Null) => Mapping::new(),
        Some(Value::Mapping(map)) => map,
        Some(other) => return Err(mismatch(path, &other, &Value::Mapping(patch))),
    };

    for (key, value) in patch {
        let name = key_name(&key);
        let child = join(path, &name);
        if value.is_null() {
            merged.remove(&key);
            continue;
        }
        match merged.get_mut(&key) {
            Some(slot) => {
                let current = std::mem::replace(slot, Value::Null);
                match merge(Some(current), value, &child, &name)? {
                    Merged::Keep(value) => *slot = value,
                    Merged::Delete => {
                        merged.remove(&key);
                    }
                }
            }
            None => {
                if let Merged::Keep(value) = merge(None, value, &child, &name)? {
                    merged.insert(key, value);
                }
            }
        }
    }
    Ok(Merged::Keep(Value::Mapping(merged)))
}

fn merge_sequence(
    base: Option<Value>,
    patch: Vec<Value>,
    path: &str,
    field: &str,
) -> Result<Merged, MergeError> {
    let mut merged = match base {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items,
        Some(other) => return Err(mismatch(path, &other, &Value::Sequence(patch))),
    };

    // `- $patch: replace` swaps the whole list for the remaining elements
    if patch.iter().any(is_replace_marker) {
        let elements = patch.into_iter().filter(|e| !is_replace_marker(e));
        return Ok(Merged::Keep(Value::Sequence(fresh_elements(elements, path, field)?)));
    }

    let Some(key) = merge_key(field, &merged, &patch) else {
        merged.extend(fresh_elements(patch.into_iter(), path, field)?);
        return Ok(Merged::Keep(Value::Sequence(merged)));
    };

    for element in patch {
        let Value::Mapping(element) = element else {
            merged.push(element);
            continue;
        };
        let (directive, element) = take_directive(element, path)?;
        let identity = element.get(key).cloned();
        let position = identity
            .as_ref()
            .and_then(|id| merged.iter().position(|m| m.get(key) == Some(id)));
        let child = match &identity {
            Some(id) => format!("{path}[{key}={}]", scalar_text(id)),
            None => format!("{path}[-]"),
        };

        match (directive, position) {
            (Some(Directive::Delete), Some(i)) => {
                merged.remove(i);
            }
            (Some(Directive::Delete), None) => {}
            (Some(Directive::Replace), Some(i)) => {
                if let Merged::Keep(value) = merge_mapping(None, element, &child)? {
                    merged[i] = value;
                }
            }
            (Some(Directive::Replace) | None, None) => {
                if let Merged::Keep(value) = merge_mapping(None, element, &child)? {
                    merged.push(value);
                }
            }
            (None, Some(i)) => {
                let current = std::mem::replace(&mut merged[i], Value::Null);
                match merge_mapping(Some(current), element, &child)? {
                    Merged::Keep(value) => merged[i] = value,
                    Merged::Delete => {
                        merged.remove(i);
                    }
                }
            }
        }
    }
    Ok(Merged::Keep(Value::Sequence(merged)))
}

/// Patch elements with directives resolved against an empty base
fn fresh_elements(
    elements: impl Iterator<Item = Value>,
    path: &str,
    field: &str,
) -> Result<Vec<Value>, MergeError> {
    let mut out = Vec::new();
    for element in elements {
        if let Merged::Keep(value) = merge(None, element, path, field)? {
            out.push(value);
        }
    }
    Ok(out)
}

fn merge_key(field: &str, base: &[Value], patch: &[Value]) -> Option<&'static str> {
    if let Some(&(_, key)) = MERGE_KEYS.iter().find(|(name, _)| *name == field) {
        return Some(key);
    }
    let has_name = |v: &Value| v.get(FALLBACK_MERGE_KEY).is_some();
    let keyed = !patch.is_empty() && base.iter().chain(patch).all(has_name);
    keyed.then_some(FALLBACK_MERGE_KEY)
}

fn take_directive(
    mut patch: Mapping,
    path: &str,
) -> Result<(Option<Directive>, Mapping), MergeError> {
    let directive = match patch.remove(DIRECTIVE_KEY) {
        None => None,
        Some(Value::String(s)) if s == "delete" => Some(Directive::Delete),
        Some(Value::String(s)) if s == "replace" => Some(Directive::Replace),
        Some(other) => {
            return Err(MergeError::InvalidDirective {
                path: if path.is_empty() { "/".into() } else { path.to_string() },
                directive: scalar_text(&other),
            })
        }
    };
    Ok((directive, patch))
}

fn is_replace_marker(value: &Value) -> bool {
    match value {
        Value::Mapping(map) => {
            map.len() == 1 && map.get(DIRECTIVE_KEY).and_then(Value::as_str) == Some("replace")
        }
        _ => false,
    }
}

fn mismatch(path: &str, base: &Value, patch: &Value) -> MergeError {
    MergeError::TypeMismatch {
        path: if path.is_empty() { "/".into() } else { path.to_string() },
        base: type_name(base),
        patch: type_name(patch),
    }
}

fn key_name(key: &Value) -> String {
    scalar_text(key)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".into(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn yaml(raw: &str) -> Value {
        serde_yaml::from_str(raw).unwrap()
    }

    fn merged(base: &str, patch: &str) -> Value {
        strategic_merge(yaml(base), yaml(patch)).unwrap()
    }

    const DEPLOYMENT: &str = r"apiVersion: apps/v1
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
        ports:
        - containerPort: 9898
          name: http
";

    #[test]
    fn keyed_containers_merge_by_name() {
        let out = merged(
            DEPLOYMENT,
            r"spec:
  replicas: 2
  template:
    spec:
      containers:
      - name: podinfo
        imagePullPolicy: Always
      - name: sidecar
        image: busybox
",
        );
        let containers = &out["spec"]["template"]["spec"]["containers"];
        assert_eq!(out["spec"]["replicas"], Value::from(2));
        assert_eq!(containers.as_sequence().unwrap().len(), 2);
        assert_eq!(containers[0]["imagePullPolicy"], Value::from("Always"));
        assert_eq!(
            containers[0]["image"],
            Value::from("ghcr.io/stefanprodan/podinfo:6.3.5")
        );
        assert_eq!(containers[1]["name"], Value::from("sidecar"));
    }

    #[test]
    fn ports_merge_by_container_port() {
        let out = merged(
            DEPLOYMENT,
            r"spec:
  template:
    spec:
      containers:
      - name: podinfo
        ports:
        - containerPort: 9898
          protocol: TCP
        - containerPort: 9999
",
        );
        let ports = &out["spec"]["template"]["spec"]["containers"][0]["ports"];
        assert_eq!(ports.as_sequence().unwrap().len(), 2);
        assert_eq!(ports[0]["name"], Value::from("http"));
        assert_eq!(ports[0]["protocol"], Value::from("TCP"));
    }

    #[test]
    fn unkeyed_sequences_append() {
        assert_eq!(merged("args: [a, b]\n", "args: [c]\n"), yaml("args: [a, b, c]\n"));
    }

    #[test]
    fn null_deletes_key() {
        assert_eq!(merged("a: 1\nb: 2\n", "b: null\n"), yaml("a: 1\n"));
    }

    #[test]
    fn delete_directive_removes_map_and_element() {
        assert_eq!(
            merged("a: {x: 1}\nb: 2\n", "a:\n  $patch: delete\n"),
            yaml("b: 2\n")
        );
        let out = merged(
            DEPLOYMENT,
            "spec:\n  template:\n    spec:\n      containers:\n      - name: podinfo\n        $patch: delete\n",
        );
        assert!(out["spec"]["template"]["spec"]["containers"]
            .as_sequence()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn replace_directive_replaces_instead_of_merging() {
        assert_eq!(
            merged("a: {x: 1, y: 2}\n", "a:\n  $patch: replace\n  z: 3\n"),
            yaml("a: {z: 3}\n")
        );
        assert_eq!(
            merged("args: [a, b]\n", "args:\n- $patch: replace\n- c\n"),
            yaml("args: [c]\n")
        );
    }

    #[test]
    fn named_elements_merge_without_known_field() {
        let out = merged(
            "rules:\n- name: a\n  v: 1\n- name: b\n  v: 2\n",
            "rules:\n- name: b\n  v: 3\n",
        );
        assert_eq!(out, yaml("rules:\n- name: a\n  v: 1\n- name: b\n  v: 3\n"));
    }

    #[test]
    fn shape_mismatch_fails_with_path() {
        let err = strategic_merge(yaml("spec: {replicas: 1}\n"), yaml("spec: [1]\n")).unwrap_err();
        assert_eq!(
            err,
            MergeError::TypeMismatch {
                path: "spec".into(),
                base: "mapping",
                patch: "sequence"
            }
        );
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let err = strategic_merge(yaml("a: {}\n"), yaml("a:\n  $patch: merge-please\n")).unwrap_err();
        assert!(matches!(err, MergeError::InvalidDirective { ref directive, .. } if directive == "merge-please"));
    }

    #[test]
    fn documents_are_matched_by_kind_and_name() {
        let mut docs = vec![
            yaml("kind: Service\nmetadata: {name: podinfo}\nspec: {type: ClusterIP}\n"),
            yaml("kind: Deployment\nmetadata: {name: podinfo}\nspec: {replicas: 1}\n"),
        ];
        merge_into_documents(
            &mut docs,
            yaml("kind: Deployment\nmetadata: {name: podinfo}\nspec: {replicas: 3}\n"),
        )
        .unwrap();
        assert_eq!(docs[0]["spec"]["type"], Value::from("ClusterIP"));
        assert_eq!(docs[1]["spec"]["replicas"], Value::from(3));
    }

    #[test]
    fn unmatched_patch_targets_first_document() {
        let mut docs = vec![yaml("a: 1\n"), yaml("b: 2\n")];
        merge_into_documents(&mut docs, yaml("c: 3\n")).unwrap();
        assert_eq!(docs, vec![yaml("a: 1\nc: 3\n"), yaml("b: 2\n")]);
    }

    proptest! {
        #[test]
        fn flat_merge_keeps_base_and_applies_patch(
            base in proptest::collection::btree_map("[a-e]", "[a-z]{1,4}", 0..5),
            patch in proptest::collection::btree_map("[c-h]", "[a-z]{1,4}", 0..5),
        ) {
            let to_value = |m: &std::collections::BTreeMap<String, String>| {
                Value::Mapping(m.iter().map(|(k, v)| (Value::from(k.as_str()), Value::from(v.as_str()))).collect())
            };
            let out = strategic_merge(to_value(&base), to_value(&patch)).unwrap();
            for (k, v) in &patch {
                prop_assert_eq!(&out[k.as_str()], &Value::from(v.as_str()));
            }
            for (k, v) in base.iter().filter(|(k, _)| !patch.contains_key(*k)) {
                prop_assert_eq!(&out[k.as_str()], &Value::from(v.as_str()));
            }
        }
    }
}
