use serde_json::json;

use preview_core::{PreviewConfig, WorkloadDescriptor};
use preview_reconciler::survey;

pub async fn status(config: &PreviewConfig, format: &str) -> anyhow::Result<()> {
    let cluster = super::cluster(config).await?;
    let environments = survey(&cluster, config.namespace()).await?;

    match format {
        "json" => {
            let rows: Vec<_> = environments
                .iter()
                .map(|env| {
                    let replicas = env.readiness.status.unwrap_or_default();
                    json!({
                        "name": env.name,
                        "ready": env.is_ready(),
                        "available_replicas": replicas.available_replicas,
                        "unavailable_replicas": replicas.unavailable_replicas,
                        "url": (!config.domain.is_empty()).then(|| {
                            WorkloadDescriptor::new(env.name.as_str(), config.namespace())
                                .environment_url(&config.domain)
                        }),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            if environments.is_empty() {
                println!("No preview environments in {}", config.namespace());
            }
            for env in &environments {
                let state = if env.is_ready() { "ready" } else { "waiting" };
                println!("{:<40} {state}", env.name);
            }
        }
    }
    Ok(())
}
