//! preview-cluster — the workload side of a preview environment.
//!
//! [`WorkloadBackend`] is the capability surface the reconciler drives:
//! existence check, create, full replace, exposure object, idempotent
//! delete, status reads, and a per-object upsert for pre-rendered object
//! sets.
//!
//! # Implementations
//!
//! ```text
//! WorkloadBackend
//!   ├── KubeBackend    (kube-rs client, one namespace)
//!   └── MemoryCluster  (in-process, scripted readiness and failures)
//! ```
//!
//! "Not found" is an expected answer here, not an error: `exists` returns
//! `false` and `delete` succeeds when the object is already gone.

pub mod apply;
pub mod kube_backend;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use preview_core::{BackendResult, ReadinessSnapshot, WorkloadDescriptor};

pub use apply::{ApplyAction, ApplyOutcome, ApplyReport, ObjectRef};
pub use kube_backend::KubeBackend;
pub use memory::{MemoryCluster, Op};

/// A workload object as stored by the cluster after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadHandle {
    pub name: String,
    pub namespace: String,
    pub generation: Option<i64>,
}

#[async_trait]
pub trait WorkloadBackend: Send + Sync {
    /// Whether the workload exists. Absence is `Ok(false)`.
    async fn exists(&self, workload: &WorkloadDescriptor) -> BackendResult<bool>;

    /// Create the workload from its manifest. Fails with `AlreadyExists`
    /// if an object with the same identity is present.
    async fn create(&self, manifest: &Value) -> BackendResult<WorkloadHandle>;

    /// Replace the workload wholesale. Fails with `NotFound` if absent.
    async fn update(
        &self,
        workload: &WorkloadDescriptor,
        manifest: &Value,
    ) -> BackendResult<WorkloadHandle>;

    /// Create the exposure object routing `port` to the workload.
    async fn create_exposure(&self, workload: &WorkloadDescriptor, port: u16) -> BackendResult<()>;

    /// Delete the workload. Deleting a missing workload succeeds.
    async fn delete(&self, workload: &WorkloadDescriptor) -> BackendResult<()>;

    /// Delete the exposure object. Deleting a missing object succeeds.
    async fn delete_exposure(&self, workload: &WorkloadDescriptor) -> BackendResult<()>;

    async fn read_status(&self, workload: &WorkloadDescriptor) -> BackendResult<ReadinessSnapshot>;

    /// Upsert each object independently: patch when present, create when
    /// absent. One object's failure never stops the others.
    async fn apply_many(&self, objects: &[Value]) -> ApplyReport;

    /// Names of the workloads in `namespace`.
    async fn list(&self, namespace: &str) -> BackendResult<Vec<String>>;
}
