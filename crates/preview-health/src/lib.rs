//! preview-health — readiness polling for preview workloads.
//!
//! The poller samples a workload's status at a fixed interval until it
//! reports zero unavailable and at least one available replica.
//!
//! # Architecture
//!
//! ```text
//! ReadinessPoller::wait_until_ready
//!   ├── ReadinessTracker (Waiting → Ready, poll count)
//!   ├── WorkloadBackend::read_status() → ReadinessSnapshot
//!   └── stops on Ready, optional deadline (Timeout), or cancel signal
//! ```
//!
//! Without a deadline the wait is unbounded and the surrounding job's
//! timeout or the cancel signal is the only way out.

pub mod poller;

pub use poller::{ReadinessPoller, ReadinessReport, ReadinessState, ReadinessTracker};
