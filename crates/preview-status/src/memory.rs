//! In-memory status backend.
//!
//! Records every transition so callers can check ordering and terminality,
//! and supports per-record failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use preview_core::{BackendError, BackendResult, DeploymentRecord, DeploymentState, RecordId};

use crate::{IN_PROGRESS_DESCRIPTION, StatusBackend};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusOp {
    Create,
    SetStatus,
    Delete,
    CheckClosed,
}

#[derive(Default)]
struct Inner {
    next_id: RecordId,
    records: BTreeMap<RecordId, DeploymentRecord>,
    transitions: Vec<(RecordId, DeploymentState)>,
    deleted: Vec<RecordId>,
    closed: bool,
    failures: HashMap<(StatusOp, Option<RecordId>), BackendError>,
}

/// A status host that lives in the process. Clones share state.
#[derive(Clone)]
pub struct MemoryStatus {
    environment: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStatus {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_closed(&self, closed: bool) {
        self.lock().closed = closed;
    }

    /// Make `op` fail. `record = None` applies to every record.
    pub fn fail(&self, op: StatusOp, record: Option<RecordId>, err: BackendError) {
        self.lock().failures.insert((op, record), err);
    }

    /// Seed a record in the given state, as left over by an earlier run.
    pub fn seed(&self, git_ref: &str, state: DeploymentState) -> RecordId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.records.insert(
            id,
            DeploymentRecord {
                id,
                git_ref: git_ref.to_string(),
                environment: self.environment.clone(),
                state,
                description: String::new(),
                environment_url: None,
            },
        );
        id
    }

    pub fn record(&self, id: RecordId) -> Option<DeploymentRecord> {
        self.lock().records.get(&id).cloned()
    }

    /// Records for `git_ref` that are not `inactive`.
    pub fn active_records(&self, git_ref: &str) -> Vec<DeploymentRecord> {
        self.lock()
            .records
            .values()
            .filter(|r| r.git_ref == git_ref && r.state.is_active())
            .cloned()
            .collect()
    }

    /// Every state written, in order.
    pub fn transitions(&self) -> Vec<(RecordId, DeploymentState)> {
        self.lock().transitions.clone()
    }

    /// States written to one record, in order.
    pub fn history(&self, id: RecordId) -> Vec<DeploymentState> {
        self.lock()
            .transitions
            .iter()
            .filter(|(rid, _)| *rid == id)
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn deleted(&self) -> Vec<RecordId> {
        self.lock().deleted.clone()
    }

    fn check(inner: &Inner, op: StatusOp, record: Option<RecordId>) -> BackendResult<()> {
        let specific = record.and_then(|id| inner.failures.get(&(op, Some(id))));
        match specific.or_else(|| inner.failures.get(&(op, None))) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StatusBackend for MemoryStatus {
    async fn create_record(&self, git_ref: &str) -> BackendResult<RecordId> {
        let id = {
            let mut inner = self.lock();
            Self::check(&inner, StatusOp::Create, None)?;
            inner.next_id += 1;
            let id = inner.next_id;
            inner.records.insert(
                id,
                DeploymentRecord {
                    id,
                    git_ref: git_ref.to_string(),
                    environment: self.environment.clone(),
                    state: DeploymentState::Pending,
                    description: format!("QA of {git_ref}"),
                    environment_url: None,
                },
            );
            inner.transitions.push((id, DeploymentState::Pending));
            id
        };
        self.set_status(id, DeploymentState::InProgress, IN_PROGRESS_DESCRIPTION, None)
            .await?;
        Ok(id)
    }

    async fn set_status(
        &self,
        id: RecordId,
        state: DeploymentState,
        description: &str,
        environment_url: Option<&str>,
    ) -> BackendResult<()> {
        let mut inner = self.lock();
        Self::check(&inner, StatusOp::SetStatus, Some(id))?;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| BackendError::NotFound(format!("deployment {id}")))?;
        record.state = state;
        record.description = description.to_string();
        record.environment_url = environment_url.map(str::to_string);
        inner.transitions.push((id, state));
        Ok(())
    }

    async fn list_records(&self, git_ref: &str) -> BackendResult<Vec<RecordId>> {
        Ok(self
            .lock()
            .records
            .values()
            .filter(|r| r.git_ref == git_ref)
            .map(|r| r.id)
            .collect())
    }

    async fn delete_record(&self, id: RecordId) -> BackendResult<()> {
        let mut inner = self.lock();
        Self::check(&inner, StatusOp::Delete, Some(id))?;
        if let Some(record) = inner.records.get(&id) {
            if record.state.is_active() {
                return Err(BackendError::Api {
                    code: 422,
                    message: "We cannot delete an active deployment unless it is the only deployment in a given environment.".to_string(),
                });
            }
        }
        if inner.records.remove(&id).is_some() {
            inner.deleted.push(id);
        }
        Ok(())
    }

    async fn is_source_closed(&self, _pull_request: u64) -> BackendResult<bool> {
        let inner = self.lock();
        Self::check(&inner, StatusOp::CheckClosed, None)?;
        Ok(inner.closed)
    }
}
