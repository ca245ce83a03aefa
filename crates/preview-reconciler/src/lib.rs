//! preview-reconciler — drives one preview environment to its desired state.
//!
//! One run handles one pull request:
//!
//! ```text
//! resolve ──► source closed? ──yes──► teardown (exposure, workload, records)
//!                  │
//!                  no
//!                  ▼
//!             exists? ──yes──► retire records ─► new record ─► replace / apply
//!                  │
//!                  no ───────► new record ─► create + exposure / apply
//!                                   │
//!                                   ▼
//!                       wait until ready ─► record success
//! ```
//!
//! Any failure after the record exists marks it `failure` before the
//! error surfaces.
//!
//! # Components
//!
//! - **`resolver`** — turns a template or a spec set into a descriptor and desired state
//! - **`reconciler`** — the control skeleton shared by both input modes

pub mod reconciler;
pub mod resolver;

pub use reconciler::{ClosedPolicy, EnvironmentSummary, Outcome, ReconcileSettings, Reconciler, survey};
pub use resolver::{DescriptorResolver, Resolved, SpecSetResolver, TemplateResolver};
