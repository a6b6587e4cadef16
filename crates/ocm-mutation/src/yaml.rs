//! YAML document helpers shared by the mutation and patch engines

use ocm_artifact::{FieldPath, PathSegment};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// Parse every document of a YAML stream
///
/// An empty stream yields a single null document.
pub(crate) fn parse_documents(data: &[u8]) -> Result<Vec<Value>, serde_yaml::Error> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(data) {
        documents.push(Value::deserialize(document)?);
    }
    if documents.is_empty() {
        documents.push(Value::Null);
    }
    Ok(documents)
}

/// Render documents back into one YAML stream
pub(crate) fn render_documents(documents: &[Value]) -> Result<String, serde_yaml::Error> {
    let rendered = documents
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rendered.join("---\n"))
}

/// Short type name used in diagnostics
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Set `value` at `path`, creating missing intermediate mappings
///
/// Sequences are indexed by `[n]` or all-digit keys; the index must exist.
pub(crate) fn set_path(root: &mut Value, path: &FieldPath, value: Value) -> Result<(), String> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err("empty path".into());
    };

    let mut current = root;
    for (depth, segment) in parents.iter().enumerate() {
        current = descend(current, segment).map_err(|reason| {
            format!(
                "{reason} at '{}'",
                FieldPath::new(path.segments()[..=depth].to_vec())
            )
        })?;
    }

    if let Value::Sequence(items) = current {
        let index = last
            .as_index()
            .ok_or_else(|| format!("cannot use key '{last}' on a sequence"))?;
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or_else(|| format!("index {index} out of range for sequence of {len}"))?;
        *slot = value;
        return Ok(());
    }

    let PathSegment::Key(key) = last else {
        return Err(format!("cannot set '{last}' on a {}", type_name(current)));
    };
    if current.is_null() {
        *current = Value::Mapping(Mapping::new());
    }
    match current {
        Value::Mapping(map) => {
            let key = mapping_key(map, key);
            map.insert(key, value);
            Ok(())
        }
        other => Err(format!("cannot set '{last}' on a {}", type_name(other))),
    }
}

fn descend<'a>(current: &'a mut Value, segment: &PathSegment) -> Result<&'a mut Value, String> {
    if current.is_null() {
        *current = Value::Mapping(Mapping::new());
    }
    match (current, segment) {
        (Value::Mapping(map), PathSegment::Key(key)) => {
            let key = mapping_key(map, key);
            Ok(map
                .entry(key)
                .or_insert_with(|| Value::Mapping(Mapping::new())))
        }
        (Value::Sequence(items), segment) => {
            let index = segment
                .as_index()
                .ok_or_else(|| format!("cannot use key '{segment}' on a sequence"))?;
            let len = items.len();
            items
                .get_mut(index)
                .ok_or_else(|| format!("index {index} out of range for sequence of {len}"))
        }
        (other, segment) => Err(format!(
            "cannot descend into {} with '{segment}'",
            type_name(other)
        )),
    }
}

/// Existing key matching `key`; all-digit keys also match integer keys
fn mapping_key(map: &Mapping, key: &str) -> Value {
    let text = Value::String(key.to_string());
    if map.contains_key(&text) {
        return text;
    }
    match key.parse::<u64>() {
        Ok(n) if map.contains_key(&Value::from(n)) => Value::from(n),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(raw: &str) -> Value {
        serde_yaml::from_str(raw).unwrap()
    }

    fn set(doc: &mut Value, path: &str, value: Value) -> Result<(), String> {
        set_path(doc, &path.parse().unwrap(), value)
    }

    #[test]
    fn sets_existing_key() {
        let mut doc = yaml("data:\n  COLOR: red\n");
        set(&mut doc, "data.COLOR", "blue".into()).unwrap();
        assert_eq!(doc, yaml("data:\n  COLOR: blue\n"));
    }

    #[test]
    fn creates_missing_mappings() {
        let mut doc = yaml("kind: ConfigMap\n");
        set(&mut doc, "metadata.labels.app", "podinfo".into()).unwrap();
        assert_eq!(doc["metadata"]["labels"]["app"], Value::from("podinfo"));
    }

    #[test]
    fn indexes_sequences_both_ways() {
        let mut doc = yaml("spec:\n  containers:\n  - name: a\n    image: old\n  - name: b\n");
        set(&mut doc, "spec.containers[0].image", "new".into()).unwrap();
        set(&mut doc, "spec.containers.1.image", "other".into()).unwrap();
        assert_eq!(doc["spec"]["containers"][0]["image"], Value::from("new"));
        assert_eq!(doc["spec"]["containers"][1]["image"], Value::from("other"));
    }

    #[test]
    fn digit_keys_address_mappings() {
        let mut doc = yaml("data:\n  \"0\": a\n");
        set(&mut doc, "data.0", "b".into()).unwrap();
        assert_eq!(doc, yaml("data:\n  \"0\": b\n"));

        let mut doc = yaml("data:\n  0:\n    inner: a\n");
        set(&mut doc, "data.0.inner", "b".into()).unwrap();
        assert_eq!(doc, yaml("data:\n  0:\n    inner: b\n"));

        let mut doc = yaml("data:\n  1: a\n");
        set(&mut doc, "data.1", "b".into()).unwrap();
        assert_eq!(doc["data"].as_mapping().unwrap().len(), 1);
        assert_eq!(doc, yaml("data:\n  1: b\n"));
    }

    #[test]
    fn out_of_range_index_fails() {
        let mut doc = yaml("items: [a]\n");
        let err = set(&mut doc, "items[3]", "x".into()).unwrap_err();
        assert_eq!(err, "index 3 out of range for sequence of 1");
    }

    #[test]
    fn descending_into_scalar_fails_with_location() {
        let mut doc = yaml("data: text\n");
        let err = set(&mut doc, "data.inner.key", "x".into()).unwrap_err();
        assert_eq!(err, "cannot descend into string with 'inner' at 'data.inner'");
    }

    #[test]
    fn multi_document_streams_round_trip() {
        let docs = parse_documents(b"a: 1\n---\nb: 2\n").unwrap();
        assert_eq!(docs.len(), 2);
        let rendered = render_documents(&docs).unwrap();
        assert_eq!(rendered, "a: 1\n---\nb: 2\n");
    }

    #[test]
    fn empty_stream_is_one_null_document() {
        assert_eq!(parse_documents(b"").unwrap(), vec![Value::Null]);
    }
}
