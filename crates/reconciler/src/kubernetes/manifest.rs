//! Multi-document YAML manifest parsing.

use kube::api::DynamicObject;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Parse a multi-document manifest into unstructured objects, keeping document order.
///
/// Empty and comment-only documents are skipped. Every remaining document must carry
/// `apiVersion`, `kind` and `metadata.name`.
pub fn parse(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(manifest).enumerate() {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }

        let json =
            yaml_to_json(value).map_err(|e| Error::Manifest(format!("document {index}: {e}")))?;
        let obj: DynamicObject = serde_json::from_value(json)
            .map_err(|e| Error::Manifest(format!("document {index}: {e}")))?;

        match &obj.types {
            Some(types) if !types.api_version.is_empty() && !types.kind.is_empty() => {}
            _ => {
                return Err(Error::Manifest(format!(
                    "document {index}: apiVersion and kind are mandatory"
                )))
            }
        }
        if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::Manifest(format!(
                "document {index}: metadata.name is mandatory"
            )));
        }

        objects.push(obj);
    }

    Ok(objects)
}

/// Convert a YAML tree to JSON. Scalar mapping keys become strings and tags are dropped.
fn yaml_to_json(value: serde_yaml::Value) -> std::result::Result<serde_json::Value, String> {
    use serde_json::Value as Json;
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => serde_json::to_value(&n).map_err(|e| e.to_string())?,
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<std::result::Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = serde_json::Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    other => return Err(format!("unsupported mapping key {other:?}")),
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Json::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

/// Join manifests into one multi-document manifest.
pub fn merge<S: AsRef<str>>(manifests: &[S]) -> String {
    manifests
        .iter()
        .map(|m| m.as_ref().trim())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("\n---\n")
}
