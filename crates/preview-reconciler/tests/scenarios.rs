//! End-to-end reconciliation scenarios against the in-memory backends.
//!
//! Covers first deploy, update with record supersession, teardown on a
//! closed pull request, and the failure-status contract when readiness
//! never arrives.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use preview_cluster::{MemoryCluster, Op, WorkloadBackend};
use preview_core::{
    BackendError, DeploymentState, ErrorKind, PreviewError, ReadinessSnapshot, WorkloadDescriptor,
};
use preview_health::ReadinessPoller;
use preview_reconciler::{
    ClosedPolicy, Outcome, ReconcileSettings, Reconciler, SpecSetResolver, TemplateResolver,
};
use preview_status::{MemoryStatus, StatusBackend, StatusOp};

const DOMAIN: &str = "preview.example.dev";
const GIT_REF: &str = "feature/login";

const TEMPLATE: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  labels:
    team: web
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: app
          image: __IMAGE__
          ports:
            - containerPort: 80
"#;

struct Harness {
    cluster: Arc<MemoryCluster>,
    status: Arc<MemoryStatus>,
}

impl Harness {
    fn new() -> Self {
        Self {
            cluster: Arc::new(MemoryCluster::new("preview")),
            status: Arc::new(MemoryStatus::new("qa")),
        }
    }

    fn reconciler(&self, poller: ReadinessPoller) -> Reconciler {
        self.reconciler_with(poller, ClosedPolicy::Teardown)
    }

    fn reconciler_with(&self, poller: ReadinessPoller, on_closed: ClosedPolicy) -> Reconciler {
        Reconciler::new(
            self.cluster.clone(),
            self.status.clone(),
            poller,
            ReconcileSettings {
                domain: DOMAIN.to_string(),
                git_ref: GIT_REF.to_string(),
                pull_request: 42,
                on_closed,
            },
        )
    }

    /// Leave the state a previous successful run would have left.
    async fn previously_deployed(&self) {
        self.cluster
            .create(&json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "preview-42"},
            }))
            .await
            .unwrap();
        self.cluster.create_exposure(&workload(), 80).await.unwrap();
    }

    fn commands(&self, verb: &str) -> Vec<String> {
        self.cluster
            .journal()
            .into_iter()
            .filter(|c| c.starts_with(verb))
            .collect()
    }
}

fn workload() -> WorkloadDescriptor {
    WorkloadDescriptor::for_pull_request("preview", 42, "preview")
}

fn template(body: &str) -> TemplateResolver {
    TemplateResolver::new(body, workload(), "registry.local/web:abc123", 80)
}

fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

// ── Apply ──────────────────────────────────────────────────────────

#[tokio::test]
async fn first_deploy_creates_workload_exposure_and_success_record() {
    let h = Harness::new();

    let outcome = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap();

    let (record, url) = match outcome {
        Outcome::Created { record, url } => (record, url),
        other => panic!("expected a first deploy, got {other:?}"),
    };
    assert_eq!(url, "https://preview-42.preview.example.dev");

    let deployment = h.cluster.get("Deployment", "preview-42").unwrap();
    assert_eq!(deployment["metadata"]["labels"]["app"], "preview-42");
    assert_eq!(deployment["metadata"]["labels"]["team"], "web");
    assert_eq!(
        deployment["spec"]["template"]["spec"]["containers"][0]["image"],
        "registry.local/web:abc123"
    );

    let service = h.cluster.get("Service", "preview-42").unwrap();
    assert_eq!(service["spec"]["ports"][0]["port"], 80);
    assert_eq!(service["spec"]["selector"]["app"], "preview-42");

    assert_eq!(
        h.status.history(record),
        vec![
            DeploymentState::Pending,
            DeploymentState::InProgress,
            DeploymentState::Success,
        ]
    );
    let stored = h.status.record(record).unwrap();
    assert_eq!(stored.description, "Success");
    assert_eq!(stored.environment_url.as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn redeploy_supersedes_old_record_and_replaces_workload() {
    let h = Harness::new();
    h.previously_deployed().await;
    let old = h.status.seed(GIT_REF, DeploymentState::Success);

    let outcome = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap();

    let (record, superseded) = match outcome {
        Outcome::Updated { record, superseded, .. } => (record, superseded),
        other => panic!("expected an update, got {other:?}"),
    };
    assert_eq!(superseded, 1);

    // Old record was deactivated before removal, and before the new one appeared.
    assert_eq!(h.status.history(old), vec![DeploymentState::Inactive]);
    assert!(h.status.record(old).is_none());
    let transitions = h.status.transitions();
    assert_eq!(transitions[0], (old, DeploymentState::Inactive));
    assert_eq!(transitions[1], (record, DeploymentState::Pending));

    let active = h.status.active_records(GIT_REF);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, record);
    assert_eq!(active[0].state, DeploymentState::Success);

    assert_eq!(h.commands("replace"), vec!["replace deployment/preview-42"]);
    // Exposure is created once, by the earlier deploy only.
    assert_eq!(h.commands("create"), vec!["create deployment/preview-42", "create service/preview-42"]);
}

#[tokio::test]
async fn terminal_write_is_last_for_the_record() {
    let h = Harness::new();
    let Outcome::Created { record, .. } = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap()
    else {
        panic!("expected a first deploy");
    };

    let history = h.status.history(record);
    let first_terminal = history.iter().position(|s| s.is_terminal()).unwrap();
    assert_eq!(first_terminal, history.len() - 1);
}

// ── Teardown ───────────────────────────────────────────────────────

#[tokio::test]
async fn closed_pull_request_tears_down_everything() {
    let h = Harness::new();
    h.previously_deployed().await;
    let old = h.status.seed(GIT_REF, DeploymentState::Success);
    h.status.set_closed(true);

    let outcome = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::TornDown { records: 1 });
    assert!(!h.cluster.contains("Deployment", "preview-42"));
    assert!(!h.cluster.contains("Service", "preview-42"));
    assert_eq!(h.status.history(old), vec![DeploymentState::Inactive]);
    assert!(h.status.list_records(GIT_REF).await.unwrap().is_empty());

    // Apply never ran.
    assert!(h.commands("replace").is_empty());
    assert!(h.commands("status").is_empty());
    assert_eq!(
        h.commands("delete"),
        vec!["delete service/preview-42", "delete deployment/preview-42"]
    );
}

#[tokio::test]
async fn teardown_twice_is_not_an_error() {
    let h = Harness::new();
    h.previously_deployed().await;
    h.status.seed(GIT_REF, DeploymentState::Success);
    let reconciler = h.reconciler(ReadinessPoller::default());

    assert_eq!(
        reconciler.teardown(&workload()).await.unwrap(),
        Outcome::TornDown { records: 1 }
    );
    assert_eq!(
        reconciler.teardown(&workload()).await.unwrap(),
        Outcome::TornDown { records: 0 }
    );
}

#[tokio::test]
async fn closed_spec_set_is_refused_when_asked() {
    let h = Harness::new();
    h.status.set_closed(true);
    let specs = SpecSetResolver::parse(
        &["apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n"],
        "preview",
    )
    .unwrap();

    let err = h
        .reconciler_with(ReadinessPoller::default(), ClosedPolicy::Refuse)
        .run(&specs, no_cancel())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(h.cluster.journal().is_empty());
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn missing_placeholder_fails_before_any_backend_call() {
    let h = Harness::new();
    // Would surface as a backend error if the source state were read first.
    h.status.fail(
        StatusOp::CheckClosed,
        None,
        BackendError::Transient("unreachable".into()),
    );

    let err = h
        .reconciler(ReadinessPoller::default())
        .run(&template("kind: Deployment\nspec: {}\n"), no_cancel())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(h.cluster.journal().is_empty());
    assert!(h.status.transitions().is_empty());
}

#[tokio::test]
async fn failure_before_record_writes_no_status() {
    let h = Harness::new();
    h.cluster.fail(
        Op::Get,
        "preview-42",
        BackendError::Api {
            code: 403,
            message: "deployments.apps is forbidden".into(),
        },
    );

    let err = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(err.user_message(), "deployments.apps is forbidden");
    assert!(h.status.transitions().is_empty());
}

#[tokio::test]
async fn create_failure_marks_record_failed() {
    let h = Harness::new();
    h.cluster.fail(
        Op::Create,
        "preview-42",
        BackendError::Api {
            code: 422,
            message: "spec.template.spec.containers[0].image: Required value".into(),
        },
    );

    let err = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap_err();

    let PreviewError::Reconciliation { record, .. } = &err else {
        panic!("expected a reconciliation failure, got {err:?}");
    };
    assert_eq!(
        h.status.history(*record),
        vec![
            DeploymentState::Pending,
            DeploymentState::InProgress,
            DeploymentState::Failure,
        ]
    );
    assert_eq!(h.status.record(*record).unwrap().description, "Failed");
    assert_eq!(
        err.user_message(),
        "spec.template.spec.containers[0].image: Required value"
    );
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_leaves_failure_not_success() {
    let h = Harness::new();
    h.cluster
        .script_readiness("preview-42", vec![ReadinessSnapshot::missing()]);

    let poller = ReadinessPoller::new(Duration::from_secs(2), Some(Duration::from_secs(30)));
    let err = h
        .reconciler(poller)
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Reconciliation);
    assert!(matches!(err.root(), PreviewError::Timeout { .. }));
    let history: Vec<_> = h.status.transitions().into_iter().map(|(_, s)| s).collect();
    assert!(!history.contains(&DeploymentState::Success));
    assert_eq!(history.last(), Some(&DeploymentState::Failure));
}

#[tokio::test(start_paused = true)]
async fn cancelled_wait_leaves_failure_not_success() {
    let h = Harness::new();
    h.cluster
        .script_readiness("preview-42", vec![ReadinessSnapshot::replicas(0, 1)]);
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let _ = tx.send(true);
    });

    let err = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), rx)
        .await
        .unwrap_err();

    assert!(matches!(err.root(), PreviewError::Cancelled(_)));
    let history: Vec<_> = h.status.transitions().into_iter().map(|(_, s)| s).collect();
    assert!(!history.contains(&DeploymentState::Success));
    assert_eq!(history.last(), Some(&DeploymentState::Failure));
}

#[tokio::test(start_paused = true)]
async fn waits_through_rollout_before_success() {
    let h = Harness::new();
    h.cluster.script_readiness(
        "preview-42",
        vec![
            ReadinessSnapshot::missing(),
            ReadinessSnapshot::replicas(0, 1),
            ReadinessSnapshot::replicas(1, 0),
        ],
    );

    let outcome = h
        .reconciler(ReadinessPoller::default())
        .run(&template(TEMPLATE), no_cancel())
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Created { .. }));
    assert_eq!(h.commands("status").len(), 3);
}

// ── Spec sets ──────────────────────────────────────────────────────

const SPEC_SET: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
    - port: 80
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 1
"#;

#[tokio::test]
async fn spec_set_upserts_each_object() {
    let h = Harness::new();
    h.cluster.insert(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": "web", "namespace": "preview"},
    }));

    let specs = SpecSetResolver::parse(&[SPEC_SET], "preview").unwrap();
    let outcome = h
        .reconciler(ReadinessPoller::default())
        .run(&specs, no_cancel())
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Created { .. }));
    assert_eq!(h.commands("patch"), vec!["patch service/web"]);
    assert_eq!(h.commands("create"), vec!["create deployment/web"]);
    assert!(h.cluster.get("Service", "web").unwrap()["spec"]["ports"].is_array());
}

#[tokio::test]
async fn spec_set_patch_failure_does_not_block_new_objects() {
    let h = Harness::new();
    h.cluster.insert(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": "web", "namespace": "preview"},
    }));
    h.cluster.fail(
        Op::Patch,
        "web",
        BackendError::Api {
            code: 422,
            message: "spec.ports: Invalid value".into(),
        },
    );

    let specs = SpecSetResolver::parse(&[SPEC_SET], "preview").unwrap();
    let err = h
        .reconciler(ReadinessPoller::default())
        .run(&specs, no_cancel())
        .await
        .unwrap_err();

    assert!(h.cluster.contains("Deployment", "web"));
    assert_eq!(err.kind(), ErrorKind::Reconciliation);
    assert_eq!(err.user_message(), "spec.ports: Invalid value");
}

#[tokio::test]
async fn spec_set_redeploy_supersedes_records() {
    let h = Harness::new();
    let specs = SpecSetResolver::parse(&[SPEC_SET], "preview").unwrap();
    let reconciler = h.reconciler(ReadinessPoller::default());

    reconciler.run(&specs, no_cancel()).await.unwrap();
    let outcome = reconciler.run(&specs, no_cancel()).await.unwrap();

    assert!(matches!(outcome, Outcome::Updated { superseded: 1, .. }));
    assert_eq!(h.status.active_records(GIT_REF).len(), 1);
    assert_eq!(
        h.commands("patch"),
        vec!["patch service/web", "patch deployment/web"]
    );
}
