use std::path::{Path, PathBuf};

use tracing::debug;

use preview_core::{PreviewConfig, PreviewError, PreviewResult};
use preview_reconciler::{ClosedPolicy, SpecSetResolver};

/// Spec-set mode: apply every document under `paths`.
pub async fn apply(
    config: &PreviewConfig,
    paths: &[PathBuf],
    teardown_on_close: bool,
) -> anyhow::Result<()> {
    let files = spec_files(paths)?;
    let sources = files
        .iter()
        .map(|file| {
            std::fs::read_to_string(file).map_err(|e| {
                PreviewError::config(format!("cannot read {}: {e}", file.display()))
            })
        })
        .collect::<PreviewResult<Vec<_>>>()?;
    let resolver = SpecSetResolver::parse(sources.as_slice(), config.namespace())?;

    let on_closed = if teardown_on_close {
        ClosedPolicy::Teardown
    } else {
        ClosedPolicy::Refuse
    };
    let reconciler = super::reconciler(config, on_closed).await?;
    let outcome = reconciler.run(&resolver, super::interrupt_signal()).await?;
    super::report(&outcome);
    Ok(())
}

/// Expand directories into their `*.yaml` / `*.yml` files, sorted by name.
fn spec_files(paths: &[PathBuf]) -> PreviewResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|e| {
                PreviewError::config(format!("cannot read {}: {e}", path.display()))
            })?;
            let mut found: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_yaml(p))
                .collect();
            found.sort();
            debug!(dir = %path.display(), count = found.len(), "spec files found");
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    if files.is_empty() {
        return Err(PreviewError::config("no spec files found"));
    }
    Ok(files)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
