use std::path::Path;

use preview_core::{PreviewConfig, PreviewError};

use crate::settings::ConfigArgs;

/// Write a preview.toml scaffold seeded from the given flags.
pub fn init(args: &ConfigArgs, path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        return Err(PreviewError::config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ))
        .into());
    }

    let config = PreviewConfig::scaffold(
        args.domain.as_deref().unwrap_or("preview.example.com"),
        args.prefix.as_deref().unwrap_or("preview"),
        args.repository.as_deref().unwrap_or("owner/repo"),
    );
    std::fs::write(path, config.to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    Ok(())
}
