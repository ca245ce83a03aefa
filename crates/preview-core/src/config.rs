//! preview.toml configuration parser.
//!
//! The configuration is assembled once at the process boundary (file, then
//! command-line and environment overrides) and handed to the reconciler as
//! an immutable value.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PreviewError, PreviewResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Base domain; environments are served at `https://<name>.<domain>`.
    pub domain: String,
    /// Name prefix; workloads are named `<prefix>-<pr>`.
    pub prefix: String,
    pub namespace: Option<String>,
    /// Target port of the exposure object.
    pub exposure_port: Option<u16>,
    pub cluster: ClusterConfig,
    pub github: GithubConfig,
    pub readiness: ReadinessConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub server: Option<String>,
    /// Base64-encoded CA bundle for `server`.
    pub certificate_authority: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// `owner/name`
    pub repository: Option<String>,
    pub pull_request: Option<u64>,
    pub head_ref: Option<String>,
    pub token: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub interval: Option<String>,
    pub timeout: Option<String>,
}

pub const DEFAULT_NAMESPACE: &str = "preview";
pub const DEFAULT_ENVIRONMENT: &str = "qa";
pub const DEFAULT_EXPOSURE_PORT: u16 = 80;
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_millis(2000);

impl PreviewConfig {
    pub fn from_file(path: &Path) -> PreviewResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PreviewError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> PreviewResult<Self> {
        toml::from_str(content).map_err(|e| PreviewError::config(format!("invalid config: {e}")))
    }

    /// Check the fields every run needs.
    pub fn validate(&self) -> PreviewResult<()> {
        if self.domain.trim().is_empty() {
            return Err(PreviewError::config("domain is required"));
        }
        if self.prefix.trim().is_empty() {
            return Err(PreviewError::config("prefix is required"));
        }
        if self.exposure_port == Some(0) {
            return Err(PreviewError::config("exposure_port must be non-zero"));
        }
        self.repository()?;
        if self.readiness_interval()?.is_zero() {
            return Err(PreviewError::config("readiness interval must be non-zero"));
        }
        self.readiness_timeout()?;
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn environment(&self) -> &str {
        self.github
            .environment
            .as_deref()
            .unwrap_or(DEFAULT_ENVIRONMENT)
    }

    pub fn exposure_port(&self) -> u16 {
        self.exposure_port.unwrap_or(DEFAULT_EXPOSURE_PORT)
    }

    /// Split `github.repository` into owner and name.
    pub fn repository(&self) -> PreviewResult<(&str, &str)> {
        let slug = self
            .github
            .repository
            .as_deref()
            .ok_or_else(|| PreviewError::config("github repository is required"))?;
        match slug.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok((owner, name))
            }
            _ => Err(PreviewError::config(format!(
                "repository must be owner/name, got {slug:?}"
            ))),
        }
    }

    pub fn pull_request(&self) -> PreviewResult<u64> {
        self.github
            .pull_request
            .ok_or_else(|| PreviewError::config("pull request number is required"))
    }

    pub fn head_ref(&self) -> PreviewResult<&str> {
        self.github
            .head_ref
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| PreviewError::config("Missing env variable GITHUB_HEAD_REF"))
    }

    pub fn readiness_interval(&self) -> PreviewResult<Duration> {
        match &self.readiness.interval {
            Some(s) => parse_duration(s)
                .ok_or_else(|| PreviewError::config(format!("invalid readiness interval {s:?}"))),
            None => Ok(DEFAULT_READINESS_INTERVAL),
        }
    }

    /// `None` waits until the surrounding job is cancelled.
    pub fn readiness_timeout(&self) -> PreviewResult<Option<Duration>> {
        self.readiness
            .timeout
            .as_deref()
            .map(|s| {
                parse_duration(s)
                    .ok_or_else(|| PreviewError::config(format!("invalid readiness timeout {s:?}")))
            })
            .transpose()
    }

    /// Scaffold a minimal preview.toml.
    pub fn scaffold(domain: &str, prefix: &str, repository: &str) -> Self {
        PreviewConfig {
            domain: domain.to_string(),
            prefix: prefix.to_string(),
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            exposure_port: Some(DEFAULT_EXPOSURE_PORT),
            cluster: ClusterConfig::default(),
            github: GithubConfig {
                repository: Some(repository.to_string()),
                environment: Some(DEFAULT_ENVIRONMENT.to_string()),
                ..Default::default()
            },
            readiness: ReadinessConfig {
                interval: Some("2s".to_string()),
                timeout: None,
            },
        }
    }

    pub fn to_toml_string(&self) -> PreviewResult<String> {
        toml::to_string_pretty(self).map_err(|e| PreviewError::config(e.to_string()))
    }
}

/// Pull-request number from a ref like `refs/pull/42/merge`.
pub fn parse_pull_ref(git_ref: &str) -> Option<u64> {
    let rest = git_ref.strip_prefix("refs/pull/")?;
    let (number, _) = rest.split_once('/')?;
    number.parse().ok()
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
