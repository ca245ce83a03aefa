use std::path::Path;

use preview_core::{PreviewConfig, PreviewError, WorkloadDescriptor};
use preview_reconciler::{ClosedPolicy, TemplateResolver};

/// Template mode: render `manifest` with `image` and reconcile.
pub async fn deploy(config: &PreviewConfig, manifest: &Path, image: &str) -> anyhow::Result<()> {
    let template = std::fs::read_to_string(manifest).map_err(|e| {
        PreviewError::config(format!("cannot read {}: {e}", manifest.display()))
    })?;
    let workload = WorkloadDescriptor::for_pull_request(
        &config.prefix,
        config.pull_request()?,
        config.namespace(),
    );
    let resolver = TemplateResolver::new(template, workload, image, config.exposure_port());

    let reconciler = super::reconciler(config, ClosedPolicy::Teardown).await?;
    let outcome = reconciler.run(&resolver, super::interrupt_signal()).await?;
    super::report(&outcome);
    Ok(())
}
