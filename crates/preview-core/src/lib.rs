//! preview-core — shared model for pull-request preview environments.
//!
//! A preview environment is one workload (plus its exposure object) in a
//! cluster namespace, mirrored by a deployment record on the source-control
//! host. This crate holds the types both sides agree on, the error kinds
//! the reconciler reasons about, the run configuration, and the manifest
//! builder that turns user input into desired state.

pub mod config;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::PreviewConfig;
pub use error::{BackendError, BackendResult, ErrorKind, PreviewError, PreviewResult};
pub use types::*;
