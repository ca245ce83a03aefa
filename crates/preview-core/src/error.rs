//! Error types shared by the backends and the reconciler.

use std::time::Duration;

use thiserror::Error;

use crate::types::RecordId;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for reconciler-level operations.
pub type PreviewResult<T> = Result<T, PreviewError>;

/// Errors reported by the cluster or the status host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The object does not exist. Expected branch, not a failure.
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The backend rejected the call with a status and message body.
    #[error("{message} (status {code})")]
    Api { code: u16, message: String },

    /// Communication failed without telling us anything about absence.
    #[error("backend unreachable: {0}")]
    Transient(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Classification of a failure, used for logging and exit reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    NotFound,
    Fatal,
    Configuration,
    Timeout,
    Cancelled,
    Reconciliation,
}

/// Errors surfaced by a reconciliation run.
#[derive(Debug, Error)]
pub enum PreviewError {
    /// Bad input detected before reconciliation started. No status record
    /// is written for these.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{workload} not ready after {elapsed:?}")]
    Timeout { workload: String, elapsed: Duration },

    #[error("wait for {0} was cancelled")]
    Cancelled(String),

    /// A failure after the deployment record `record` was created. The
    /// record has been marked `failure` (best effort) before this surfaces.
    #[error("reconciliation of {workload} failed: {source}")]
    Reconciliation {
        workload: String,
        record: RecordId,
        #[source]
        source: Box<PreviewError>,
    },
}

impl PreviewError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Backend(BackendError::NotFound(_)) => ErrorKind::NotFound,
            Self::Backend(BackendError::Transient(_)) => ErrorKind::Transient,
            Self::Backend(_) => ErrorKind::Fatal,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Reconciliation { .. } => ErrorKind::Reconciliation,
        }
    }

    /// The error underneath any reconciliation wrapper.
    pub fn root(&self) -> &PreviewError {
        match self {
            Self::Reconciliation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Most specific human-readable message available.
    ///
    /// A backend-provided message body wins over the generic rendering.
    pub fn user_message(&self) -> String {
        match self.root() {
            Self::Backend(BackendError::Api { message, .. }) if !message.is_empty() => {
                message.clone()
            }
            root => root.to_string(),
        }
    }
}
