//! Configuration boundary.
//!
//! Reads preview.toml (if any), then applies flags and environment
//! variables on top. The result is the only configuration the library
//! crates ever see.

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::debug;

use preview_core::config::parse_pull_ref;
use preview_core::{PreviewConfig, PreviewResult};

const DEFAULT_CONFIG_FILE: &str = "preview.toml";

#[derive(Debug, Default, Args)]
pub struct ConfigArgs {
    /// Config file. Defaults to ./preview.toml when present.
    #[arg(long, global = true, env = "PREVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base domain; environments are served at https://<name>.<domain>.
    #[arg(long, global = true, env = "PREVIEW_DOMAIN")]
    pub domain: Option<String>,

    /// Workload name prefix; workloads are named <prefix>-<pr>.
    #[arg(long, global = true, env = "PREVIEW_PREFIX")]
    pub prefix: Option<String>,

    #[arg(long, global = true, env = "PREVIEW_NAMESPACE")]
    pub namespace: Option<String>,

    /// Port the exposure object forwards to.
    #[arg(long, global = true, env = "PREVIEW_PORT")]
    pub port: Option<u16>,

    /// Cluster API server URL.
    #[arg(long, global = true, env = "KUBE_SERVER")]
    pub server: Option<String>,

    /// Base64-encoded CA certificate of the API server.
    #[arg(long, global = true, env = "KUBE_CERT")]
    pub cert: Option<String>,

    /// Service account token for the API server.
    #[arg(long, global = true, env = "KUBE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// owner/name
    #[arg(long, global = true, env = "GITHUB_REPOSITORY")]
    pub repository: Option<String>,

    /// Pull request number. Defaults to the number in GITHUB_REF.
    #[arg(long, global = true, env = "PREVIEW_PULL_REQUEST")]
    pub pull_request: Option<u64>,

    #[arg(long, global = true, env = "GITHUB_REF", hide = true)]
    pub github_ref: Option<String>,

    /// Branch the deployment records are created for.
    #[arg(long, global = true, env = "GITHUB_HEAD_REF")]
    pub head_ref: Option<String>,

    /// Deployment environment name on GitHub.
    #[arg(long, global = true, env = "PREVIEW_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Give up waiting for readiness after this long (e.g. 10m).
    #[arg(long, global = true, env = "PREVIEW_READINESS_TIMEOUT")]
    pub readiness_timeout: Option<String>,
}

impl ConfigArgs {
    /// Assemble the run configuration. Does not validate.
    pub fn load(&self) -> PreviewResult<PreviewConfig> {
        let mut config = match self.config_path() {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                PreviewConfig::from_file(&path)?
            }
            None => PreviewConfig::default(),
        };
        self.overlay(&mut config);
        Ok(config)
    }

    fn config_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(path.clone()),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                default.exists().then(|| default.to_path_buf())
            }
        }
    }

    fn overlay(&self, config: &mut PreviewConfig) {
        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        set(&mut config.namespace, &self.namespace);
        if self.port.is_some() {
            config.exposure_port = self.port;
        }

        set(&mut config.cluster.server, &self.server);
        set(&mut config.cluster.certificate_authority, &self.cert);
        set(&mut config.cluster.token, &self.token);

        set(&mut config.github.token, &self.github_token);
        set(&mut config.github.repository, &self.repository);
        set(&mut config.github.head_ref, &self.head_ref);
        set(&mut config.github.environment, &self.environment);
        if let Some(number) = self
            .pull_request
            .or_else(|| self.github_ref.as_deref().and_then(parse_pull_ref))
        {
            config.github.pull_request = Some(number);
        }

        set(&mut config.readiness.timeout, &self.readiness_timeout);
    }
}

fn set(field: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        *field = Some(value.clone());
    }
}
