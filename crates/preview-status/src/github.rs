//! GitHub deployments as the status backend.
//!
//! Records are GitHub deployments scoped to `(repository, ref,
//! environment)`; state transitions are deployment statuses.

use std::future::Future;

use async_trait::async_trait;
use octocrab::Octocrab;
use octocrab::models::IssueState;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use preview_core::{
    BackendError, BackendResult, DeploymentState, PreviewError, PreviewResult, RecordId,
};

use crate::{IN_PROGRESS_DESCRIPTION, StatusBackend};

/// Largest page the deployments listing returns.
const PAGE_SIZE: usize = 100;

/// Deployment records in one GitHub repository and environment.
#[derive(Clone)]
pub struct GithubStatus {
    client: Octocrab,
    owner: String,
    repo: String,
    environment: String,
}

#[derive(Debug, Serialize)]
struct NewDeployment<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    environment: &'a str,
    description: String,
    transient_environment: bool,
    required_contexts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NewStatus<'a> {
    state: DeploymentState,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DeploymentId {
    id: RecordId,
}

impl GithubStatus {
    pub fn new(
        client: Octocrab,
        owner: impl Into<String>,
        repo: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            environment: environment.into(),
        }
    }

    /// Build an authenticated client from a token.
    pub fn connect(token: &str, owner: &str, repo: &str, environment: &str) -> PreviewResult<Self> {
        if token.is_empty() {
            return Err(PreviewError::config("github token is required"));
        }
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| PreviewError::config(format!("cannot build github client: {e}")))?;
        info!(%owner, %repo, %environment, "github client ready");
        Ok(Self::new(client, owner, repo, environment))
    }

    fn route(&self, path: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner, self.repo, path)
    }
}

#[async_trait]
impl StatusBackend for GithubStatus {
    async fn create_record(&self, git_ref: &str) -> BackendResult<RecordId> {
        let body = NewDeployment {
            git_ref,
            environment: &self.environment,
            description: format!("QA of {git_ref}"),
            transient_environment: true,
            required_contexts: Vec::new(),
        };
        let created: DeploymentId = self
            .client
            .post(self.route("deployments"), Some(&body))
            .await
            .map_err(|e| classify(e, "deployment"))?;
        info!(record = created.id, %git_ref, "deployment record created");

        self.set_status(
            created.id,
            DeploymentState::InProgress,
            IN_PROGRESS_DESCRIPTION,
            None,
        )
        .await?;
        Ok(created.id)
    }

    async fn set_status(
        &self,
        id: RecordId,
        state: DeploymentState,
        description: &str,
        environment_url: Option<&str>,
    ) -> BackendResult<()> {
        let body = NewStatus {
            state,
            description,
            environment_url,
        };
        let _: serde_json::Value = self
            .client
            .post(self.route(&format!("deployments/{id}/statuses")), Some(&body))
            .await
            .map_err(|e| classify(e, &format!("deployment {id}")))?;
        debug!(record = id, %state, "deployment status set");
        Ok(())
    }

    async fn list_records(&self, git_ref: &str) -> BackendResult<Vec<RecordId>> {
        let ids = collect_pages(move |page| {
            let route = self.route("deployments");
            let params = [
                ("ref", git_ref.to_string()),
                ("environment", self.environment.clone()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            async move {
                let batch: Vec<DeploymentId> = self
                    .client
                    .get(route, Some(&params))
                    .await
                    .map_err(|e| classify(e, "deployments"))?;
                Ok::<_, BackendError>(batch.into_iter().map(|r| r.id).collect())
            }
        })
        .await?;
        debug!(%git_ref, records = ids.len(), "deployment records listed");
        Ok(ids)
    }

    async fn delete_record(&self, id: RecordId) -> BackendResult<()> {
        let what = format!("deployment {id}");
        let result = match self
            .client
            ._delete(self.route(&format!("deployments/{id}")), None::<&()>)
            .await
        {
            Ok(response) => octocrab::map_github_error(response).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result.map_err(|e| classify(e, &what)) {
            Ok(()) => {
                info!(record = id, "deployment record deleted");
                Ok(())
            }
            Err(BackendError::NotFound(_)) => {
                debug!(record = id, "deployment record already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn is_source_closed(&self, pull_request: u64) -> BackendResult<bool> {
        let pr = self
            .client
            .pulls(&self.owner, &self.repo)
            .get(pull_request)
            .await
            .map_err(|e| classify(e, &format!("pull request #{pull_request}")))?;
        Ok(matches!(pr.state, Some(IssueState::Closed)))
    }
}

/// Request pages from 1 upwards until one comes back short.
async fn collect_pages<T, F, Fut>(mut fetch: F) -> BackendResult<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = BackendResult<Vec<T>>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch(page).await?;
        let last = batch.len() < PAGE_SIZE;
        items.extend(batch);
        if last {
            return Ok(items);
        }
        page += 1;
    }
}

/// Map an octocrab error onto the backend error kinds.
fn classify(err: octocrab::Error, what: &str) -> BackendError {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            status_error(source.status_code.as_u16(), &source.message, what)
        }
        other => BackendError::Transient(other.to_string()),
    }
}

fn status_error(code: u16, message: &str, what: &str) -> BackendError {
    match code {
        404 => BackendError::NotFound(what.to_string()),
        _ => BackendError::Api {
            code,
            message: message.to_string(),
        },
    }
}
