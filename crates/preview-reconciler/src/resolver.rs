//! Descriptor resolvers.
//!
//! Both input modes share the reconciler; they differ only in how the
//! workload's identity and desired state are obtained. Resolution is pure
//! and runs before any backend call, so bad input never leaves a record
//! behind.

use serde_json::Value;
use tracing::debug;

use preview_core::manifest::{
    build_workload_manifest, default_namespace, find_workload, object_name, parse_documents,
};
use preview_core::{DesiredState, PreviewError, PreviewResult, WorkloadDescriptor};

/// A resolved workload and what should exist for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub workload: WorkloadDescriptor,
    pub desired: DesiredState,
}

pub trait DescriptorResolver: Send + Sync {
    fn resolve(&self) -> PreviewResult<Resolved>;
}

/// Template mode: a single workload document with an image placeholder,
/// named after the pull request.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    template: String,
    workload: WorkloadDescriptor,
    image: String,
    exposure_port: u16,
}

impl TemplateResolver {
    pub fn new(
        template: impl Into<String>,
        workload: WorkloadDescriptor,
        image: impl Into<String>,
        exposure_port: u16,
    ) -> Self {
        Self {
            template: template.into(),
            workload,
            image: image.into(),
            exposure_port,
        }
    }
}

impl DescriptorResolver for TemplateResolver {
    fn resolve(&self) -> PreviewResult<Resolved> {
        if self.image.is_empty() {
            return Err(PreviewError::config("image reference is required"));
        }
        let manifest = build_workload_manifest(&self.template, &self.workload.name, &self.image)?;
        Ok(Resolved {
            workload: self.workload.clone(),
            desired: DesiredState::Workload {
                manifest,
                exposure_port: self.exposure_port,
            },
        })
    }
}

/// Spec-set mode: pre-rendered objects, named after the single
/// `Deployment` among them.
#[derive(Debug, Clone)]
pub struct SpecSetResolver {
    objects: Vec<Value>,
    namespace: String,
}

impl SpecSetResolver {
    pub fn new(objects: Vec<Value>, namespace: impl Into<String>) -> Self {
        Self {
            objects,
            namespace: namespace.into(),
        }
    }

    /// Parse one or more multi-document YAML sources.
    pub fn parse<S: AsRef<str>>(sources: &[S], namespace: &str) -> PreviewResult<Self> {
        let mut objects = Vec::new();
        for source in sources {
            objects.extend(parse_documents(source.as_ref())?);
        }
        debug!(count = objects.len(), "spec set parsed");
        Ok(Self::new(objects, namespace))
    }
}

impl DescriptorResolver for SpecSetResolver {
    fn resolve(&self) -> PreviewResult<Resolved> {
        let mut objects = self.objects.clone();
        default_namespace(&mut objects, &self.namespace);

        let workload = find_workload(&objects)?;
        let name = object_name(workload)?;
        let namespace = workload["metadata"]["namespace"]
            .as_str()
            .unwrap_or(&self.namespace);
        let workload = WorkloadDescriptor::new(name, namespace);

        Ok(Resolved {
            workload,
            desired: DesiredState::Objects(objects),
        })
    }
}
