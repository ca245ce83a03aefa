//! Domain types shared by the backends and the reconciler.
//!
//! The reconciler never owns remote state: it holds a `WorkloadDescriptor`
//! naming the cluster object, the `DesiredState` it should converge to,
//! and the opaque `RecordId` of the deployment record it is driving.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier of a deployment record on the status host.
pub type RecordId = u64;

// ── Workload identity ──────────────────────────────────────────────

/// Identifies one preview workload (and its exposure object) in the cluster.
///
/// The name must be stable for the whole life of the pull request so that
/// create, update and delete all target the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub name: String,
    pub namespace: String,
}

impl WorkloadDescriptor {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Derive the name from a per-PR prefix: `<prefix>-<number>`.
    pub fn for_pull_request(prefix: &str, number: u64, namespace: &str) -> Self {
        Self::new(format!("{prefix}-{number}"), namespace)
    }

    /// Public URL of the preview environment under `domain`.
    pub fn environment_url(&self, domain: &str) -> String {
        format!("https://{}.{}", self.name, domain)
    }
}

impl fmt::Display for WorkloadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ── Desired state ──────────────────────────────────────────────────

/// What should exist in the cluster once reconciliation finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredState {
    /// A single workload manifest. The exposure object is created
    /// alongside it on first deploy only.
    Workload { manifest: Value, exposure_port: u16 },
    /// A pre-rendered object set, applied object by object with upsert.
    Objects(Vec<Value>),
}

impl DesiredState {
    /// Number of declarative objects this state applies.
    pub fn object_count(&self) -> usize {
        match self {
            Self::Workload { .. } => 1,
            Self::Objects(objects) => objects.len(),
        }
    }
}

// ── Deployment records ─────────────────────────────────────────────

/// State of a deployment record on the status host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    InProgress,
    Success,
    Failure,
    Inactive,
}

impl DeploymentState {
    /// Success and failure end a reconciliation; nothing non-terminal may
    /// follow them for the same record within a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Whether the record still counts as live for its ref.
    pub fn is_active(self) -> bool {
        self != Self::Inactive
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployment record as seen by the status backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: RecordId,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub environment: String,
    pub state: DeploymentState,
    pub description: String,
    pub environment_url: Option<String>,
}

// ── Readiness ──────────────────────────────────────────────────────

/// Replica counters reported by the cluster for a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub available_replicas: Option<i32>,
    pub unavailable_replicas: Option<i32>,
}

/// A point-in-time read of a workload's status.
///
/// `status` is `None` until the cluster has written a status block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessSnapshot {
    pub status: Option<ReplicaStatus>,
}

impl ReadinessSnapshot {
    /// A snapshot without any status block.
    pub fn missing() -> Self {
        Self { status: None }
    }

    pub fn replicas(available: i32, unavailable: i32) -> Self {
        Self {
            status: Some(ReplicaStatus {
                available_replicas: Some(available),
                unavailable_replicas: Some(unavailable),
            }),
        }
    }

    /// Zero unavailable replicas and at least one available.
    pub fn is_ready(&self) -> bool {
        match self.status {
            Some(status) => {
                status.unavailable_replicas.unwrap_or(0) == 0
                    && status.available_replicas.unwrap_or(0) > 0
            }
            None => false,
        }
    }
}
