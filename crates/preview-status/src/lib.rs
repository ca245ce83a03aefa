//! preview-status — deployment records on the source-control host.
//!
//! A deployment record tracks one reconciliation of a ref. The reconciler
//! only holds the record id and issues full state transitions through
//! [`StatusBackend`]; the backend owns the records.
//!
//! # Record lifecycle
//!
//! ```text
//! create_record ──► in_progress ──► success | failure
//!                                          │
//!           superseded / PR closed ──► inactive ──► deleted
//! ```
//!
//! A record is always moved to `inactive` before it is deleted, since
//! consumers may be polling its state.

pub mod github;
pub mod memory;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use preview_core::{BackendError, BackendResult, DeploymentState, RecordId};

pub use github::GithubStatus;
pub use memory::{MemoryStatus, StatusOp};

pub const IN_PROGRESS_DESCRIPTION: &str = "In progress";
pub const SUCCESS_DESCRIPTION: &str = "Success";
pub const FAILURE_DESCRIPTION: &str = "Failed";
pub const INACTIVE_DESCRIPTION: &str = "Destroying";

#[async_trait]
pub trait StatusBackend: Send + Sync {
    /// Create a record for `git_ref` and move it to `in_progress`.
    /// The record means "reconciliation started", not "ready".
    async fn create_record(&self, git_ref: &str) -> BackendResult<RecordId>;

    /// Write a full state transition. Redundant transitions are accepted.
    async fn set_status(
        &self,
        id: RecordId,
        state: DeploymentState,
        description: &str,
        environment_url: Option<&str>,
    ) -> BackendResult<()>;

    /// Ids of all non-deleted records for `git_ref`.
    async fn list_records(&self, git_ref: &str) -> BackendResult<Vec<RecordId>>;

    /// Delete one record. A missing record is not an error.
    async fn delete_record(&self, id: RecordId) -> BackendResult<()>;

    /// Whether the pull request is closed or merged.
    async fn is_source_closed(&self, pull_request: u64) -> BackendResult<bool>;

    /// Deactivate then delete every record for `git_ref`.
    ///
    /// Records are retired concurrently and independently; one failure
    /// does not stop the others. Returns the number of records retired,
    /// or the first failure once all have been attempted.
    async fn delete_records(&self, git_ref: &str) -> BackendResult<usize> {
        let ids = self.list_records(git_ref).await?;
        debug!(%git_ref, count = ids.len(), "retiring deployment records");

        let results = join_all(ids.iter().map(|&id| retire(self, id))).await;

        let mut first_error: Option<BackendError> = None;
        let mut retired = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => retired += 1,
                Err(e) => {
                    warn!(record = id, error = %e, "failed to retire deployment record");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(retired),
        }
    }
}

async fn retire<S: StatusBackend + ?Sized>(backend: &S, id: RecordId) -> BackendResult<()> {
    backend
        .set_status(id, DeploymentState::Inactive, INACTIVE_DESCRIPTION, None)
        .await?;
    backend.delete_record(id).await
}
