//! Manifest building.
//!
//! Two input modes produce the desired state:
//! - a single workload template carrying the `__IMAGE__` placeholder,
//!   into which the workload name and selector labels are merged;
//! - a pre-rendered multi-document set containing exactly one `Deployment`.
//!
//! Everything here runs before any network call, so every failure is a
//! configuration error.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{PreviewError, PreviewResult};

/// Placeholder replaced by the built image reference.
pub const IMAGE_PLACEHOLDER: &str = "__IMAGE__";

/// Kind of the workload object inside a spec set.
pub const WORKLOAD_KIND: &str = "Deployment";

/// Build the workload manifest from a template.
///
/// Fails if the template lacks the placeholder. Only `metadata.name`,
/// `metadata.labels.app`, `spec.selector.matchLabels.app` and
/// `spec.template.metadata.labels.app` are overwritten; every other
/// user-supplied field is kept.
pub fn build_workload_manifest(template: &str, name: &str, image: &str) -> PreviewResult<Value> {
    if !template.contains(IMAGE_PLACEHOLDER) {
        return Err(PreviewError::config(format!(
            "Manifest does not include {IMAGE_PLACEHOLDER} placeholder"
        )));
    }

    let rendered = template.replace(IMAGE_PLACEHOLDER, image);
    let mut manifest: Value = serde_yaml::from_str(&rendered)
        .map_err(|e| PreviewError::config(format!("invalid manifest template: {e}")))?;
    if !manifest.is_object() {
        return Err(PreviewError::config("manifest template must be a mapping"));
    }

    deep_merge(&mut manifest, identity_overlay(name));
    debug!(%name, "workload manifest built");
    Ok(manifest)
}

fn identity_overlay(name: &str) -> Value {
    json!({
        "metadata": {
            "name": name,
            "labels": { "app": name },
        },
        "spec": {
            "selector": { "matchLabels": { "app": name } },
            "template": { "metadata": { "labels": { "app": name } } },
        },
    })
}

/// Merge `overlay` into `base`. Mappings merge key by key, arrays are
/// concatenated, any other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay),
        (base, overlay) => *base = overlay,
    }
}

/// Parse a multi-document YAML stream into objects, skipping empty
/// documents.
pub fn parse_documents(content: &str) -> PreviewResult<Vec<Value>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value: Value = serde::Deserialize::deserialize(document)
            .map_err(|e| PreviewError::config(format!("invalid spec document: {e}")))?;
        match value {
            Value::Null => continue,
            Value::Object(_) => objects.push(value),
            _ => return Err(PreviewError::config("spec documents must be mappings")),
        }
    }
    Ok(objects)
}

/// The single `Deployment` object in a spec set.
pub fn find_workload(objects: &[Value]) -> PreviewResult<&Value> {
    let mut matches = objects
        .iter()
        .filter(|obj| obj.get("kind").and_then(Value::as_str) == Some(WORKLOAD_KIND));
    match (matches.next(), matches.next()) {
        (Some(workload), None) => Ok(workload),
        (None, _) => Err(PreviewError::config("No deployment found in specs")),
        (Some(_), Some(_)) => Err(PreviewError::config(
            "Multiple deployments found in specs; expected exactly one",
        )),
    }
}

/// `metadata.name` of an object.
pub fn object_name(object: &Value) -> PreviewResult<&str> {
    object
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PreviewError::config("object is missing metadata.name"))
}

/// Set `metadata.namespace` on every object that does not carry one.
pub fn default_namespace(objects: &mut [Value], namespace: &str) {
    for object in objects {
        if let Value::Object(map) = object {
            let metadata = map
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(metadata) = metadata {
                metadata
                    .entry("namespace")
                    .or_insert_with(|| Value::String(namespace.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  labels:
    team: web
spec:
  replicas: 2
  selector:
    matchLabels:
      tier: frontend
  template:
    spec:
      containers:
        - name: app
          image: __IMAGE__
          ports:
            - containerPort: 8080
"#;

    #[test]
    fn template_without_placeholder_is_rejected() {
        let err = build_workload_manifest("kind: Deployment\n", "preview-42", "img:1")
            .unwrap_err();
        assert!(matches!(err, PreviewError::Configuration(_)));
        assert!(err.to_string().contains(IMAGE_PLACEHOLDER));
    }

    #[test]
    fn template_gets_image_and_identity() {
        let manifest =
            build_workload_manifest(TEMPLATE, "preview-42", "registry/app:abc").unwrap();

        assert_eq!(manifest["metadata"]["name"], "preview-42");
        assert_eq!(manifest["metadata"]["labels"]["app"], "preview-42");
        assert_eq!(manifest["spec"]["selector"]["matchLabels"]["app"], "preview-42");
        assert_eq!(
            manifest["spec"]["template"]["metadata"]["labels"]["app"],
            "preview-42"
        );
        assert_eq!(
            manifest["spec"]["template"]["spec"]["containers"][0]["image"],
            "registry/app:abc"
        );

        // User fields outside the injected paths survive.
        assert_eq!(manifest["metadata"]["labels"]["team"], "web");
        assert_eq!(manifest["spec"]["selector"]["matchLabels"]["tier"], "frontend");
        assert_eq!(manifest["spec"]["replicas"], 2);
        assert!(!manifest.to_string().contains(IMAGE_PLACEHOLDER));
    }

    #[test]
    fn every_placeholder_is_replaced() {
        let template = "kind: Deployment\nmetadata:\n  annotations:\n    image: __IMAGE__\nspec:\n  image: __IMAGE__\n";
        let manifest = build_workload_manifest(template, "p-1", "img:2").unwrap();
        assert_eq!(manifest["metadata"]["annotations"]["image"], "img:2");
        assert_eq!(manifest["spec"]["image"], "img:2");
    }

    #[test]
    fn deep_merge_concatenates_arrays_and_overrides_scalars() {
        let mut base = json!({"a": [1], "b": {"c": 1, "d": 2}, "e": "x"});
        deep_merge(&mut base, json!({"a": [2], "b": {"c": 3}, "e": "y"}));
        assert_eq!(base, json!({"a": [1, 2], "b": {"c": 3, "d": 2}, "e": "y"}));
    }

    #[test]
    fn spec_set_locates_single_deployment() {
        let objects = parse_documents(
            "---\nkind: Service\nmetadata:\n  name: web\n---\nkind: Deployment\nmetadata:\n  name: web-7\n",
        )
        .unwrap();
        assert_eq!(objects.len(), 2);
        let workload = find_workload(&objects).unwrap();
        assert_eq!(object_name(workload).unwrap(), "web-7");
    }

    #[test]
    fn spec_set_without_or_with_many_deployments_fails() {
        let none = parse_documents("kind: Service\nmetadata:\n  name: a\n").unwrap();
        assert!(matches!(find_workload(&none), Err(PreviewError::Configuration(_))));

        let two = parse_documents(
            "kind: Deployment\nmetadata:\n  name: a\n---\nkind: Deployment\nmetadata:\n  name: b\n",
        )
        .unwrap();
        assert!(matches!(find_workload(&two), Err(PreviewError::Configuration(_))));
    }

    #[test]
    fn scalar_documents_are_rejected() {
        assert!(parse_documents("just a string\n").is_err());
    }

    #[test]
    fn namespace_defaults_only_when_absent() {
        let mut objects = vec![
            json!({"kind": "Service", "metadata": {"name": "a"}}),
            json!({"kind": "Deployment", "metadata": {"name": "b", "namespace": "other"}}),
        ];
        default_namespace(&mut objects, "preview");
        assert_eq!(objects[0]["metadata"]["namespace"], "preview");
        assert_eq!(objects[1]["metadata"]["namespace"], "other");
    }
}
