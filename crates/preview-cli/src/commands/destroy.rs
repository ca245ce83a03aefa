use preview_core::{PreviewConfig, WorkloadDescriptor};
use preview_reconciler::ClosedPolicy;

/// Remove `<prefix>-<pr>` whatever the pull request state.
pub async fn destroy(config: &PreviewConfig) -> anyhow::Result<()> {
    let workload = WorkloadDescriptor::for_pull_request(
        &config.prefix,
        config.pull_request()?,
        config.namespace(),
    );
    let reconciler = super::reconciler(config, ClosedPolicy::Teardown).await?;
    let outcome = reconciler.teardown(&workload).await?;
    super::report(&outcome);
    Ok(())
}
