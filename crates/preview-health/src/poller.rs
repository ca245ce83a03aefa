//! Readiness poll loop.
//!
//! Reads a `ReadinessSnapshot` per tick and feeds it to a
//! `ReadinessTracker`. The loop ends when the tracker reaches `Ready`,
//! when the optional deadline passes, or when the cancel signal fires.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use preview_cluster::WorkloadBackend;
use preview_core::config::DEFAULT_READINESS_INTERVAL;
use preview_core::{PreviewConfig, PreviewError, PreviewResult, ReadinessSnapshot, WorkloadDescriptor};

/// Readiness of the workload being waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Waiting,
    /// Terminal.
    Ready,
}

/// Tracks snapshots for a single wait.
#[derive(Debug)]
pub struct ReadinessTracker {
    state: ReadinessState,
    polls: u32,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self {
            state: ReadinessState::Waiting,
            polls: 0,
        }
    }

    /// Record a snapshot and return the new state. `Ready` is sticky.
    pub fn record(&mut self, snapshot: &ReadinessSnapshot) -> ReadinessState {
        self.polls += 1;
        if self.state == ReadinessState::Waiting && snapshot.is_ready() {
            self.state = ReadinessState::Ready;
        }
        self.state
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessReport {
    pub polls: u32,
    pub elapsed: Duration,
}

/// Blocking wait for a workload to become ready.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    interval: Duration,
    timeout: Option<Duration>,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::new(DEFAULT_READINESS_INTERVAL, None)
    }
}

impl ReadinessPoller {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }

    pub fn from_config(config: &PreviewConfig) -> PreviewResult<Self> {
        Ok(Self::new(
            config.readiness_interval()?,
            config.readiness_timeout()?,
        ))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Poll until the workload is ready.
    ///
    /// Status read failures end the wait with that error. Setting `cancel`
    /// to `true` ends it with `Cancelled`; passing the deadline ends it
    /// with `Timeout`.
    pub async fn wait_until_ready(
        &self,
        backend: &dyn WorkloadBackend,
        workload: &WorkloadDescriptor,
        mut cancel: watch::Receiver<bool>,
    ) -> PreviewResult<ReadinessReport> {
        let started = Instant::now();
        let mut tracker = ReadinessTracker::new();

        debug!(%workload, interval = ?self.interval, timeout = ?self.timeout, "waiting for readiness");

        let poll = async {
            loop {
                let snapshot = backend.read_status(workload).await?;
                if tracker.record(&snapshot) == ReadinessState::Ready {
                    return Ok::<u32, PreviewError>(tracker.polls());
                }
                debug!(%workload, polls = tracker.polls(), status = ?snapshot.status, "not ready yet");
                tokio::time::sleep(self.interval).await;
            }
        };

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, poll)
                    .await
                    .unwrap_or_else(|_| {
                        Err(PreviewError::Timeout {
                            workload: workload.name.clone(),
                            elapsed: started.elapsed(),
                        })
                    }),
                None => poll.await,
            }
        };

        let polls = tokio::select! {
            result = bounded => result?,
            _ = cancelled(&mut cancel) => {
                warn!(%workload, "readiness wait cancelled");
                return Err(PreviewError::Cancelled(workload.name.clone()));
            }
        };

        let elapsed = started.elapsed();
        info!(%workload, polls, ?elapsed, "workload ready");
        Ok(ReadinessReport { polls, elapsed })
    }
}

/// Resolves once the signal is `true`. A dropped sender never cancels.
async fn cancelled(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
