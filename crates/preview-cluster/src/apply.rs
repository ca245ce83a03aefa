//! Declarative apply helpers shared by the backends.
//!
//! Each object of a batch gets its own create-or-patch decision. Before
//! writing, the previous last-applied annotation is stripped and the
//! annotation is re-stamped with the current desired state, so the
//! object always carries a diff-able copy of what was last applied.

use serde_json::{Map, Value};
use tracing::warn;

use preview_core::{BackendError, BackendResult};

/// Annotation holding the serialized desired state of the last apply.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Identity of a declarative object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ObjectRef {
    pub fn from_value(object: &Value) -> BackendResult<Self> {
        let field = |path: &[&str]| -> Option<String> {
            let mut cursor = object;
            for key in path {
                cursor = cursor.get(*key)?;
            }
            cursor.as_str().map(str::to_string)
        };
        let invalid = |what: &str| BackendError::Api {
            code: 422,
            message: format!("object is missing {what}"),
        };

        Ok(Self {
            api_version: field(&["apiVersion"]).ok_or_else(|| invalid("apiVersion"))?,
            kind: field(&["kind"]).ok_or_else(|| invalid("kind"))?,
            name: field(&["metadata", "name"]).ok_or_else(|| invalid("metadata.name"))?,
            namespace: field(&["metadata", "namespace"]),
        })
    }

    /// `(group, version)` of `apiVersion`; the core group is empty.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.to_lowercase(), self.name)
    }
}

/// Replace the last-applied annotation with the serialized desired state.
pub fn stamp_last_applied(object: &mut Value) {
    let Value::Object(map) = object else {
        return;
    };

    let annotations = map
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .map(|metadata| {
            metadata
                .entry("annotations")
                .or_insert_with(|| Value::Object(Map::new()))
        });
    if let Some(Value::Object(annotations)) = annotations {
        annotations.remove(LAST_APPLIED_ANNOTATION);
    }

    let snapshot = Value::Object(map.clone()).to_string();
    if let Some(Value::Object(annotations)) = map
        .get_mut("metadata")
        .and_then(|m| m.get_mut("annotations"))
    {
        annotations.insert(LAST_APPLIED_ANNOTATION.to_string(), Value::String(snapshot));
    }
}

/// What apply did to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Created,
    Patched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// `kind/name`, or the document index when the object is unreadable.
    pub target: String,
    pub result: BackendResult<ApplyAction>,
}

/// Per-object results of one `apply_many` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub outcomes: Vec<ApplyOutcome>,
}

impl ApplyReport {
    pub fn push(&mut self, target: impl Into<String>, result: BackendResult<ApplyAction>) {
        let target = target.into();
        if let Err(e) = &result {
            warn!(%target, error = %e, "apply failed for object");
        }
        self.outcomes.push(ApplyOutcome { target, result });
    }

    pub fn failures(&self) -> impl Iterator<Item = &ApplyOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn count(&self, action: ApplyAction) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.as_ref().ok() == Some(&action))
            .count()
    }

    /// `Ok` if every object applied, otherwise the first failure.
    pub fn into_result(self) -> BackendResult<Vec<ApplyOutcome>> {
        if let Some(Err(e)) = self.outcomes.iter().map(|o| &o.result).find(|r| r.is_err()) {
            return Err(e.clone());
        }
        Ok(self.outcomes)
    }
}
