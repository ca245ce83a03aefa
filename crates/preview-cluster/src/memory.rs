//! In-memory workload backend.
//!
//! Keeps objects in a map keyed by `(kind, namespace, name)`, records
//! every call in a journal, and lets callers script readiness snapshots
//! and inject failures per operation and object name.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use preview_core::{BackendError, BackendResult, ReadinessSnapshot, WorkloadDescriptor};

use crate::apply::{ApplyAction, ApplyReport, ObjectRef, stamp_last_applied};
use crate::{WorkloadBackend, WorkloadHandle};

const WORKLOAD_KIND: &str = "Deployment";
const EXPOSURE_KIND: &str = "Service";

/// Operation names used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Replace,
    Patch,
    Delete,
    ReadStatus,
    List,
}

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    snapshots: HashMap<String, VecDeque<ReadinessSnapshot>>,
    failures: HashMap<(Op, String), BackendError>,
    journal: Vec<String>,
    generation: i64,
}

/// A cluster that lives in the process. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    namespace: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCluster {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `op` on object `name` fail with `err`.
    pub fn fail(&self, op: Op, name: &str, err: BackendError) {
        self.lock().failures.insert((op, name.to_string()), err);
    }

    /// Snapshots returned by successive `read_status` calls for `name`.
    /// The last one repeats.
    pub fn script_readiness(&self, name: &str, snapshots: Vec<ReadinessSnapshot>) {
        self.lock()
            .snapshots
            .insert(name.to_string(), snapshots.into());
    }

    /// Seed an object directly, bypassing the journal.
    pub fn insert(&self, object: Value) {
        if let Ok(target) = ObjectRef::from_value(&object) {
            let key = self.key(&target.kind, target.namespace.as_deref(), &target.name);
            self.lock().objects.insert(key, object);
        }
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<Value> {
        let key = self.key(kind, None, name);
        self.lock().objects.get(&key).cloned()
    }

    pub fn contains(&self, kind: &str, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    /// Calls made so far, e.g. `create deployment/preview-42`.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    fn key(&self, kind: &str, namespace: Option<&str>, name: &str) -> Key {
        (
            kind.to_string(),
            namespace.unwrap_or(&self.namespace).to_string(),
            name.to_string(),
        )
    }

    fn check(inner: &mut Inner, op: Op, name: &str, entry: String) -> BackendResult<()> {
        inner.journal.push(entry);
        match inner.failures.get(&(op, name.to_string())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn remove(&self, kind: &str, workload: &WorkloadDescriptor) -> BackendResult<()> {
        let mut inner = self.lock();
        let entry = format!("delete {}/{}", kind.to_lowercase(), workload.name);
        Self::check(&mut inner, Op::Delete, &workload.name, entry)?;
        let key = self.key(kind, Some(&workload.namespace), &workload.name);
        if inner.objects.remove(&key).is_none() {
            debug!(name = %workload.name, kind, "already absent");
        }
        Ok(())
    }

    fn apply_one(&self, object: &Value) -> BackendResult<ApplyAction> {
        let target = ObjectRef::from_value(object)?;
        let key = self.key(&target.kind, target.namespace.as_deref(), &target.name);
        let mut desired = object.clone();
        stamp_last_applied(&mut desired);

        let mut inner = self.lock();
        Self::check(&mut inner, Op::Get, &target.name, format!("get {target}"))?;
        if inner.objects.contains_key(&key) {
            Self::check(&mut inner, Op::Patch, &target.name, format!("patch {target}"))?;
            inner.objects.insert(key, desired);
            Ok(ApplyAction::Patched)
        } else {
            Self::check(&mut inner, Op::Create, &target.name, format!("create {target}"))?;
            inner.objects.insert(key, desired);
            Ok(ApplyAction::Created)
        }
    }
}

#[async_trait]
impl WorkloadBackend for MemoryCluster {
    async fn exists(&self, workload: &WorkloadDescriptor) -> BackendResult<bool> {
        let mut inner = self.lock();
        let entry = format!("get deployment/{}", workload.name);
        Self::check(&mut inner, Op::Get, &workload.name, entry)?;
        let key = self.key(WORKLOAD_KIND, Some(&workload.namespace), &workload.name);
        Ok(inner.objects.contains_key(&key))
    }

    async fn create(&self, manifest: &Value) -> BackendResult<WorkloadHandle> {
        let name = manifest["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let key = self.key(WORKLOAD_KIND, None, &name);

        let mut inner = self.lock();
        Self::check(&mut inner, Op::Create, &name, format!("create deployment/{name}"))?;
        if inner.objects.contains_key(&key) {
            return Err(BackendError::AlreadyExists(format!("deployment/{name}")));
        }
        inner.generation += 1;
        inner.objects.insert(key, manifest.clone());
        Ok(WorkloadHandle {
            name,
            namespace: self.namespace.clone(),
            generation: Some(inner.generation),
        })
    }

    async fn update(
        &self,
        workload: &WorkloadDescriptor,
        manifest: &Value,
    ) -> BackendResult<WorkloadHandle> {
        let key = self.key(WORKLOAD_KIND, Some(&workload.namespace), &workload.name);

        let mut inner = self.lock();
        let entry = format!("replace deployment/{}", workload.name);
        Self::check(&mut inner, Op::Replace, &workload.name, entry)?;
        if !inner.objects.contains_key(&key) {
            return Err(BackendError::NotFound(format!("deployment/{}", workload.name)));
        }
        inner.generation += 1;
        inner.objects.insert(key, manifest.clone());
        Ok(WorkloadHandle {
            name: workload.name.clone(),
            namespace: workload.namespace.clone(),
            generation: Some(inner.generation),
        })
    }

    async fn create_exposure(&self, workload: &WorkloadDescriptor, port: u16) -> BackendResult<()> {
        let key = self.key(EXPOSURE_KIND, Some(&workload.namespace), &workload.name);

        let mut inner = self.lock();
        let entry = format!("create service/{}", workload.name);
        Self::check(&mut inner, Op::Create, &workload.name, entry)?;
        if inner.objects.contains_key(&key) {
            return Err(BackendError::AlreadyExists(format!("service/{}", workload.name)));
        }
        let service = json!({
            "apiVersion": "v1",
            "kind": EXPOSURE_KIND,
            "metadata": {"name": workload.name, "labels": {"app": workload.name}},
            "spec": {
                "type": "NodePort",
                "selector": {"app": workload.name},
                "ports": [{"port": 80, "protocol": "TCP", "targetPort": port}],
            },
        });
        inner.objects.insert(key, service);
        Ok(())
    }

    async fn delete(&self, workload: &WorkloadDescriptor) -> BackendResult<()> {
        self.remove(WORKLOAD_KIND, workload)
    }

    async fn delete_exposure(&self, workload: &WorkloadDescriptor) -> BackendResult<()> {
        self.remove(EXPOSURE_KIND, workload)
    }

    async fn read_status(&self, workload: &WorkloadDescriptor) -> BackendResult<ReadinessSnapshot> {
        let key = self.key(WORKLOAD_KIND, Some(&workload.namespace), &workload.name);

        let mut inner = self.lock();
        let entry = format!("status deployment/{}", workload.name);
        Self::check(&mut inner, Op::ReadStatus, &workload.name, entry)?;
        if !inner.objects.contains_key(&key) {
            return Err(BackendError::NotFound(format!("deployment/{}", workload.name)));
        }
        let snapshot = match inner.snapshots.get_mut(&workload.name) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().copied(),
            None => None,
        };
        Ok(snapshot.unwrap_or_else(|| ReadinessSnapshot::replicas(1, 0)))
    }

    async fn apply_many(&self, objects: &[Value]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (index, object) in objects.iter().enumerate() {
            let target = ObjectRef::from_value(object)
                .map(|t| t.to_string())
                .unwrap_or_else(|_| format!("document #{index}"));
            report.push(target, self.apply_one(object));
        }
        report
    }

    async fn list(&self, namespace: &str) -> BackendResult<Vec<String>> {
        let mut inner = self.lock();
        Self::check(&mut inner, Op::List, namespace, format!("list deployments in {namespace}"))?;
        Ok(inner
            .objects
            .keys()
            .filter(|(kind, ns, _)| kind == WORKLOAD_KIND && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::LAST_APPLIED_ANNOTATION;

    fn workload() -> WorkloadDescriptor {
        WorkloadDescriptor::new("preview-42", "preview")
    }

    fn manifest(name: &str) -> Value {
        json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": name}})
    }

    #[tokio::test]
    async fn create_then_exists_and_conflicts() {
        let cluster = MemoryCluster::new("preview");
        assert!(!cluster.exists(&workload()).await.unwrap());

        let handle = cluster.create(&manifest("preview-42")).await.unwrap();
        assert_eq!(handle.name, "preview-42");
        assert!(cluster.exists(&workload()).await.unwrap());

        let err = cluster.create(&manifest("preview-42")).await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_requires_existing_workload() {
        let cluster = MemoryCluster::new("preview");
        let err = cluster
            .update(&workload(), &manifest("preview-42"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cluster = MemoryCluster::new("preview");
        cluster.create(&manifest("preview-42")).await.unwrap();
        cluster.create_exposure(&workload(), 80).await.unwrap();

        for _ in 0..2 {
            cluster.delete_exposure(&workload()).await.unwrap();
            cluster.delete(&workload()).await.unwrap();
        }
        assert!(!cluster.contains("Deployment", "preview-42"));
        assert!(!cluster.contains("Service", "preview-42"));
    }

    #[tokio::test]
    async fn scripted_readiness_repeats_last_snapshot() {
        let cluster = MemoryCluster::new("preview");
        cluster.create(&manifest("preview-42")).await.unwrap();
        cluster.script_readiness(
            "preview-42",
            vec![ReadinessSnapshot::missing(), ReadinessSnapshot::replicas(1, 0)],
        );

        assert_eq!(
            cluster.read_status(&workload()).await.unwrap(),
            ReadinessSnapshot::missing()
        );
        for _ in 0..3 {
            assert!(cluster.read_status(&workload()).await.unwrap().is_ready());
        }
    }

    #[tokio::test]
    async fn apply_patches_existing_and_creates_new() {
        let cluster = MemoryCluster::new("preview");
        cluster.insert(json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "a"}}));

        let batch = vec![
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "b"}}),
            json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "a"}, "spec": {}}),
        ];
        let report = cluster.apply_many(&batch).await;
        assert_eq!(report.count(ApplyAction::Created), 1);
        assert_eq!(report.count(ApplyAction::Patched), 1);

        let patched = cluster.get("Service", "a").unwrap();
        assert!(patched["spec"].is_object());
        assert!(patched["metadata"]["annotations"][LAST_APPLIED_ANNOTATION].is_string());
    }

    #[tokio::test]
    async fn read_failure_is_not_treated_as_absence() {
        let cluster = MemoryCluster::new("preview");
        cluster.fail(Op::Get, "b", BackendError::Transient("timeout".into()));

        let batch = vec![json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b"}})];
        let report = cluster.apply_many(&batch).await;
        assert_eq!(report.failures().count(), 1);
        assert!(!cluster.contains("ConfigMap", "b"));
        assert!(!cluster.journal().iter().any(|c| c.starts_with("create")));
    }

    #[tokio::test]
    async fn list_returns_workloads_in_namespace() {
        let cluster = MemoryCluster::new("preview");
        cluster.create(&manifest("preview-1")).await.unwrap();
        cluster.create(&manifest("preview-2")).await.unwrap();
        cluster.create_exposure(&WorkloadDescriptor::new("preview-1", "preview"), 80)
            .await
            .unwrap();

        assert_eq!(
            cluster.list("preview").await.unwrap(),
            vec!["preview-1".to_string(), "preview-2".to_string()]
        );
        assert!(cluster.list("other").await.unwrap().is_empty());
    }
}
