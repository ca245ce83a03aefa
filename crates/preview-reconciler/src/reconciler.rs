//! Reconciler — the control skeleton.
//!
//! Sequences calls to the workload and status backends for one pull
//! request. The reconciler holds only the record id; it never inspects
//! record contents.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use preview_cluster::{ApplyAction, WorkloadBackend};
use preview_core::{
    DeploymentState, DesiredState, PreviewConfig, PreviewError, PreviewResult, ReadinessSnapshot,
    RecordId, WorkloadDescriptor,
};
use preview_health::ReadinessPoller;
use preview_status::{FAILURE_DESCRIPTION, SUCCESS_DESCRIPTION, StatusBackend};

use crate::resolver::{DescriptorResolver, Resolved};

/// What to do when the pull request is already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosedPolicy {
    /// Remove the environment.
    #[default]
    Teardown,
    /// Refuse to run.
    Refuse,
}

/// Per-run inputs, fixed at construction.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Base domain of environment URLs.
    pub domain: String,
    /// Ref the deployment records are scoped to.
    pub git_ref: String,
    pub pull_request: u64,
    pub on_closed: ClosedPolicy,
}

impl ReconcileSettings {
    pub fn from_config(config: &PreviewConfig) -> PreviewResult<Self> {
        Ok(Self {
            domain: config.domain.clone(),
            git_ref: config.head_ref()?.to_string(),
            pull_request: config.pull_request()?,
            on_closed: ClosedPolicy::default(),
        })
    }

    pub fn with_closed_policy(mut self, policy: ClosedPolicy) -> Self {
        self.on_closed = policy;
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First deploy: workload (and exposure) created and ready.
    Created { record: RecordId, url: String },
    /// Existing workload replaced and ready; earlier records retired.
    Updated {
        record: RecordId,
        url: String,
        superseded: usize,
    },
    /// Environment removed.
    TornDown { records: usize },
}

pub struct Reconciler {
    workloads: Arc<dyn WorkloadBackend>,
    status: Arc<dyn StatusBackend>,
    poller: ReadinessPoller,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        workloads: Arc<dyn WorkloadBackend>,
        status: Arc<dyn StatusBackend>,
        poller: ReadinessPoller,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            workloads,
            status,
            poller,
            settings,
        }
    }

    /// Resolve the input, then tear down or apply depending on the pull
    /// request state.
    pub async fn run(
        &self,
        resolver: &dyn DescriptorResolver,
        cancel: watch::Receiver<bool>,
    ) -> PreviewResult<Outcome> {
        let Resolved { workload, desired } = resolver.resolve()?;
        debug!(%workload, objects = desired.object_count(), "desired state resolved");

        if self.status.is_source_closed(self.settings.pull_request).await? {
            info!(pull_request = self.settings.pull_request, "pull request is closed");
            return match self.settings.on_closed {
                ClosedPolicy::Teardown => self.teardown(&workload).await,
                ClosedPolicy::Refuse => Err(PreviewError::config("Can not deploy closed pr")),
            };
        }

        self.apply(&workload, &desired, cancel).await
    }

    /// Remove the exposure object, the workload, and every record for the
    /// ref. Safe to repeat.
    pub async fn teardown(&self, workload: &WorkloadDescriptor) -> PreviewResult<Outcome> {
        info!(%workload, git_ref = %self.settings.git_ref, "tearing down preview environment");

        self.workloads.delete_exposure(workload).await?;
        self.workloads.delete(workload).await?;
        let records = self.status.delete_records(&self.settings.git_ref).await?;

        info!(%workload, records, "preview environment removed");
        Ok(Outcome::TornDown { records })
    }

    /// Create or update the workload and wait for it to become ready.
    pub async fn apply(
        &self,
        workload: &WorkloadDescriptor,
        desired: &DesiredState,
        cancel: watch::Receiver<bool>,
    ) -> PreviewResult<Outcome> {
        let git_ref = &self.settings.git_ref;
        let exists = self.workloads.exists(workload).await?;

        // Earlier records go before the new one is created.
        let superseded = if exists {
            let retired = self.status.delete_records(git_ref).await?;
            debug!(%workload, retired, "superseded earlier deployment records");
            retired
        } else {
            0
        };

        let record = self.status.create_record(git_ref).await?;
        info!(%workload, record, exists, "deployment record created");

        match self.converge(workload, desired, exists, record, cancel).await {
            Ok(url) if exists => Ok(Outcome::Updated {
                record,
                url,
                superseded,
            }),
            Ok(url) => Ok(Outcome::Created { record, url }),
            Err(source) => {
                self.mark_failed(record, workload, &source).await;
                Err(PreviewError::Reconciliation {
                    workload: workload.name.clone(),
                    record,
                    source: Box::new(source),
                })
            }
        }
    }

    async fn converge(
        &self,
        workload: &WorkloadDescriptor,
        desired: &DesiredState,
        exists: bool,
        record: RecordId,
        cancel: watch::Receiver<bool>,
    ) -> PreviewResult<String> {
        match desired {
            DesiredState::Workload { manifest, .. } if exists => {
                self.workloads.update(workload, manifest).await?;
                info!(%workload, "workload replaced");
            }
            DesiredState::Workload {
                manifest,
                exposure_port,
            } => {
                self.workloads.create(manifest).await?;
                self.workloads
                    .create_exposure(workload, *exposure_port)
                    .await?;
                info!(%workload, port = exposure_port, "workload and exposure created");
            }
            DesiredState::Objects(objects) => {
                let report = self.workloads.apply_many(objects).await;
                info!(
                    %workload,
                    created = report.count(ApplyAction::Created),
                    patched = report.count(ApplyAction::Patched),
                    failed = report.failures().count(),
                    "spec set applied"
                );
                report.into_result()?;
            }
        }

        self.poller
            .wait_until_ready(self.workloads.as_ref(), workload, cancel)
            .await?;

        let url = workload.environment_url(&self.settings.domain);
        self.status
            .set_status(record, DeploymentState::Success, SUCCESS_DESCRIPTION, Some(&url))
            .await?;
        info!(%workload, record, %url, "preview environment ready");
        Ok(url)
    }

    /// Best effort: the caller sees the error that caused the failure.
    async fn mark_failed(&self, record: RecordId, workload: &WorkloadDescriptor, cause: &PreviewError) {
        error!(%workload, record, error = %cause, "reconciliation failed");
        if let Err(e) = self
            .status
            .set_status(record, DeploymentState::Failure, FAILURE_DESCRIPTION, None)
            .await
        {
            warn!(record, error = %e, "could not mark deployment record failed");
        }
    }
}

/// One workload in the preview namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSummary {
    pub name: String,
    pub readiness: ReadinessSnapshot,
}

impl EnvironmentSummary {
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }
}

/// Read-only listing of the workloads in `namespace` with their readiness.
pub async fn survey(
    workloads: &dyn WorkloadBackend,
    namespace: &str,
) -> PreviewResult<Vec<EnvironmentSummary>> {
    let mut summaries = Vec::new();
    for name in workloads.list(namespace).await? {
        let readiness = workloads
            .read_status(&WorkloadDescriptor::new(name.as_str(), namespace))
            .await?;
        summaries.push(EnvironmentSummary { name, readiness });
    }
    Ok(summaries)
}
