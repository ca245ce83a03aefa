//! Subcommand implementations.

pub mod apply;
pub mod deploy;
pub mod destroy;
pub mod init;
pub mod status;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use preview_cluster::KubeBackend;
use preview_core::{PreviewConfig, PreviewError, PreviewResult};
use preview_health::ReadinessPoller;
use preview_reconciler::{ClosedPolicy, Outcome, ReconcileSettings, Reconciler};
use preview_status::GithubStatus;

pub(crate) async fn cluster(config: &PreviewConfig) -> PreviewResult<KubeBackend> {
    KubeBackend::connect(&config.cluster, config.namespace()).await
}

pub(crate) fn github(config: &PreviewConfig) -> PreviewResult<GithubStatus> {
    let (owner, repo) = config.repository()?;
    let token = config
        .github
        .token
        .as_deref()
        .ok_or_else(|| PreviewError::config("Missing env variable GITHUB_TOKEN"))?;
    GithubStatus::connect(token, owner, repo, config.environment())
}

/// Validate the configuration and wire both backends into a reconciler.
pub(crate) async fn reconciler(
    config: &PreviewConfig,
    on_closed: ClosedPolicy,
) -> PreviewResult<Reconciler> {
    config.validate()?;
    let settings = ReconcileSettings::from_config(config)?.with_closed_policy(on_closed);
    let poller = ReadinessPoller::from_config(config)?;
    let status = github(config)?;
    let workloads = cluster(config).await?;
    Ok(Reconciler::new(
        Arc::new(workloads),
        Arc::new(status),
        poller,
        settings,
    ))
}

/// Flips to `true` on Ctrl-C.
pub(crate) fn interrupt_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            let _ = tx.send(true);
        }
    });
    rx
}

pub(crate) fn report(outcome: &Outcome) {
    match outcome {
        Outcome::Created { record, url } => {
            info!(record, "environment created");
            println!("✓ Deployed {url}");
        }
        Outcome::Updated {
            record,
            url,
            superseded,
        } => {
            info!(record, superseded, "environment updated");
            println!("✓ Updated {url}");
        }
        Outcome::TornDown { records } => {
            info!(records, "environment removed");
            println!("✓ Removed preview environment");
        }
    }
}
