//! Kubernetes workload backend.
//!
//! Workloads are `apps/v1` Deployments; the exposure object is a
//! `NodePort` Service with the same name. Arbitrary objects from a
//! pre-rendered set go through the dynamic API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, Config};
use serde_json::{Value, json};
use tracing::{debug, info};

use preview_core::config::ClusterConfig;
use preview_core::{
    BackendError, BackendResult, PreviewError, PreviewResult, ReadinessSnapshot, ReplicaStatus,
    WorkloadDescriptor,
};

use crate::apply::{ApplyAction, ApplyReport, ObjectRef, stamp_last_applied};
use crate::{WorkloadBackend, WorkloadHandle};

/// User name of the generated kubeconfig.
const CI_USER: &str = "preview-ci";

/// Port the exposure object listens on.
const SERVICE_PORT: i32 = 80;

/// Workload backend over a kube-rs client, scoped to one namespace.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    namespace: String,
}

impl KubeBackend {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect with explicit credentials, or infer the ambient kubeconfig /
    /// in-cluster config when none are given.
    pub async fn connect(cluster: &ClusterConfig, namespace: &str) -> PreviewResult<Self> {
        let config = match (&cluster.server, &cluster.certificate_authority, &cluster.token) {
            (Some(server), Some(ca), Some(token)) => {
                let kubeconfig = credentials_kubeconfig(server, ca, token, namespace)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| PreviewError::config(format!("invalid cluster credentials: {e}")))?
            }
            (None, None, None) => Config::infer()
                .await
                .map_err(|e| PreviewError::config(format!("no cluster configuration: {e}")))?,
            _ => {
                return Err(PreviewError::config(
                    "cluster server, certificate authority and token must be given together",
                ));
            }
        };

        let client = Client::try_from(config)
            .map_err(|e| PreviewError::config(format!("cannot build cluster client: {e}")))?;
        info!(%namespace, "cluster client ready");
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic(&self, target: &ObjectRef) -> Api<DynamicObject> {
        let (group, version) = target.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &target.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let namespace = target.namespace.as_deref().unwrap_or(&self.namespace);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    async fn apply_one(&self, object: &Value) -> BackendResult<ApplyAction> {
        let target = ObjectRef::from_value(object)?;
        let api = self.dynamic(&target);
        let what = target.to_string();

        let mut desired = object.clone();
        stamp_last_applied(&mut desired);

        // Only a definite 404 leads to create; any other read failure is
        // this object's failure.
        let current = api
            .get_opt(&target.name)
            .await
            .map_err(|e| classify(e, &what))?;

        match current {
            Some(_) => {
                api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&desired))
                    .await
                    .map_err(|e| classify(e, &what))?;
                debug!(object = %what, "patched");
                Ok(ApplyAction::Patched)
            }
            None => {
                let object: DynamicObject = serde_json::from_value(desired)
                    .map_err(|e| invalid_manifest(&what, e))?;
                api.create(&PostParams::default(), &object)
                    .await
                    .map_err(|e| classify(e, &what))?;
                debug!(object = %what, "created");
                Ok(ApplyAction::Created)
            }
        }
    }
}

#[async_trait]
impl WorkloadBackend for KubeBackend {
    async fn exists(&self, workload: &WorkloadDescriptor) -> BackendResult<bool> {
        let found = self
            .deployments(&workload.namespace)
            .get_opt(&workload.name)
            .await
            .map_err(|e| classify(e, &deployment_ref(workload)))?;
        Ok(found.is_some())
    }

    async fn create(&self, manifest: &Value) -> BackendResult<WorkloadHandle> {
        let deployment = parse_deployment(manifest)?;
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let created = self
            .deployments(&self.namespace)
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| classify(e, &format!("deployment/{name}")))?;
        info!(%name, "deployment created");
        Ok(handle(created, &self.namespace))
    }

    async fn update(
        &self,
        workload: &WorkloadDescriptor,
        manifest: &Value,
    ) -> BackendResult<WorkloadHandle> {
        let deployment = parse_deployment(manifest)?;
        let replaced = self
            .deployments(&workload.namespace)
            .replace(&workload.name, &PostParams::default(), &deployment)
            .await
            .map_err(|e| classify(e, &deployment_ref(workload)))?;
        info!(name = %workload.name, "deployment replaced");
        Ok(handle(replaced, &workload.namespace))
    }

    async fn create_exposure(&self, workload: &WorkloadDescriptor, port: u16) -> BackendResult<()> {
        let service = exposure_service(&workload.name, port);
        self.services(&workload.namespace)
            .create(&PostParams::default(), &service)
            .await
            .map_err(|e| classify(e, &format!("service/{}", workload.name)))?;
        info!(name = %workload.name, port, "service created");
        Ok(())
    }

    async fn delete(&self, workload: &WorkloadDescriptor) -> BackendResult<()> {
        let result = self
            .deployments(&workload.namespace)
            .delete(&workload.name, &DeleteParams::default())
            .await;
        ignore_missing(result.map(|_| ()), &deployment_ref(workload))
    }

    async fn delete_exposure(&self, workload: &WorkloadDescriptor) -> BackendResult<()> {
        let result = self
            .services(&workload.namespace)
            .delete(&workload.name, &DeleteParams::default())
            .await;
        ignore_missing(result.map(|_| ()), &format!("service/{}", workload.name))
    }

    async fn read_status(&self, workload: &WorkloadDescriptor) -> BackendResult<ReadinessSnapshot> {
        let deployment = self
            .deployments(&workload.namespace)
            .get(&workload.name)
            .await
            .map_err(|e| classify(e, &deployment_ref(workload)))?;
        Ok(snapshot_of(&deployment))
    }

    async fn apply_many(&self, objects: &[Value]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (index, object) in objects.iter().enumerate() {
            let target = ObjectRef::from_value(object)
                .map(|t| t.to_string())
                .unwrap_or_else(|_| format!("document #{index}"));
            report.push(target, self.apply_one(object).await);
        }
        report
    }

    async fn list(&self, namespace: &str) -> BackendResult<Vec<String>> {
        let deployments = self
            .deployments(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, &format!("deployments in {namespace}")))?;
        Ok(deployments
            .items
            .into_iter()
            .filter_map(|d| d.metadata.name)
            .collect())
    }
}

/// Map a kube error onto the backend error kinds.
pub fn classify(err: kube::Error, what: &str) -> BackendError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => BackendError::NotFound(what.to_string()),
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            BackendError::AlreadyExists(what.to_string())
        }
        kube::Error::Api(resp) => BackendError::Api {
            code: resp.code,
            message: resp.message,
        },
        other => BackendError::Transient(other.to_string()),
    }
}

fn ignore_missing(result: Result<(), kube::Error>, what: &str) -> BackendResult<()> {
    match result.map_err(|e| classify(e, what)) {
        Err(BackendError::NotFound(_)) => {
            debug!(object = %what, "already absent");
            Ok(())
        }
        Err(e) => Err(e),
        Ok(()) => {
            info!(object = %what, "deleted");
            Ok(())
        }
    }
}

fn deployment_ref(workload: &WorkloadDescriptor) -> String {
    format!("deployment/{}", workload.name)
}

fn invalid_manifest(what: &str, err: serde_json::Error) -> BackendError {
    BackendError::Api {
        code: 422,
        message: format!("invalid manifest for {what}: {err}"),
    }
}

fn parse_deployment(manifest: &Value) -> BackendResult<Deployment> {
    serde_json::from_value(manifest.clone()).map_err(|e| invalid_manifest("deployment", e))
}

fn handle(deployment: Deployment, namespace: &str) -> WorkloadHandle {
    WorkloadHandle {
        name: deployment.metadata.name.unwrap_or_default(),
        namespace: deployment
            .metadata
            .namespace
            .unwrap_or_else(|| namespace.to_string()),
        generation: deployment.metadata.generation,
    }
}

/// Readiness counters of a deployment; `None` until status is written.
pub fn snapshot_of(deployment: &Deployment) -> ReadinessSnapshot {
    ReadinessSnapshot {
        status: deployment.status.as_ref().map(|s| ReplicaStatus {
            available_replicas: s.available_replicas,
            unavailable_replicas: s.unavailable_replicas,
        }),
    }
}

/// The `NodePort` service exposing workload `name` on port 80.
pub fn exposure_service(name: &str, target_port: u16) -> Service {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                port: SERVICE_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(i32::from(target_port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single-context kubeconfig for a bearer-token CI user.
fn credentials_kubeconfig(
    server: &str,
    certificate_authority: &str,
    token: &str,
    namespace: &str,
) -> PreviewResult<Kubeconfig> {
    let document = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "cluster",
            "cluster": {
                "server": server,
                "certificate-authority-data": certificate_authority,
            },
        }],
        "contexts": [{
            "name": "context",
            "context": {
                "cluster": "cluster",
                "user": CI_USER,
                "namespace": namespace,
            },
        }],
        "current-context": "context",
        "users": [{
            "name": CI_USER,
            "user": { "token": token },
        }],
    });
    serde_json::from_value(document)
        .map_err(|e| PreviewError::config(format!("invalid cluster credentials: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classify_maps_status_codes() {
        assert_eq!(
            classify(api_error(404, "NotFound", "gone"), "deployment/a"),
            BackendError::NotFound("deployment/a".into())
        );
        assert_eq!(
            classify(api_error(409, "AlreadyExists", "exists"), "deployment/a"),
            BackendError::AlreadyExists("deployment/a".into())
        );
        assert_eq!(
            classify(api_error(409, "Conflict", "stale resourceVersion"), "deployment/a"),
            BackendError::Api {
                code: 409,
                message: "stale resourceVersion".into()
            }
        );
        assert_eq!(
            classify(api_error(403, "Forbidden", "denied"), "deployment/a"),
            BackendError::Api {
                code: 403,
                message: "denied".into()
            }
        );
    }

    #[test]
    fn deleting_missing_object_is_ok() {
        assert!(ignore_missing(Err(api_error(404, "NotFound", "gone")), "service/a").is_ok());
        assert!(ignore_missing(Err(api_error(500, "InternalError", "boom")), "service/a").is_err());
    }

    #[test]
    fn snapshot_reflects_status_block() {
        let mut deployment = Deployment::default();
        assert_eq!(snapshot_of(&deployment), ReadinessSnapshot::missing());

        deployment.status = Some(DeploymentStatus {
            available_replicas: Some(2),
            unavailable_replicas: None,
            ..Default::default()
        });
        let snapshot = snapshot_of(&deployment);
        assert!(snapshot.is_ready());
    }

    #[test]
    fn exposure_service_targets_workload() {
        let service = exposure_service("preview-42", 8080);
        assert_eq!(service.metadata.name.as_deref(), Some("preview-42"));
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(
            spec.selector.unwrap().get("app").map(String::as_str),
            Some("preview-42")
        );
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn kubeconfig_from_credentials() {
        let kubeconfig =
            credentials_kubeconfig("https://k8s.example:6443", "Q0E=", "secret", "preview")
                .unwrap();
        assert_eq!(kubeconfig.current_context.as_deref(), Some("context"));
        assert_eq!(kubeconfig.auth_infos[0].name, CI_USER);
        let cluster = kubeconfig.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(cluster.server.as_deref(), Some("https://k8s.example:6443"));
    }

    #[test]
    fn manifest_must_be_a_deployment_shape() {
        assert!(parse_deployment(&json!({"spec": "nope"})).is_err());
        let ok = parse_deployment(&json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "preview-42"},
        }))
        .unwrap();
        assert_eq!(ok.metadata.name.as_deref(), Some("preview-42"));
    }
}
