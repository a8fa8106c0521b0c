//! The acquisition pipeline: one module per stage, run strictly in order by
//! [`orchestrator::AcquisitionPipeline`].

pub mod classify;
pub mod download;
pub mod fetcher;
pub mod orchestrator;
pub mod parse;
pub mod report;
pub mod units;
pub mod upload;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Time window of a run. `from` is the newer bound: hubs list newest first,
/// so a crawl starts at `from` and walks back to `until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunWindow {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl RunWindow {
    pub fn new(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { from, until }
    }

    pub fn is_valid(&self) -> bool {
        self.until <= self.from
    }
}

/// Bounded attempts with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Sleep between attempts. Returns `false` if the run was cancelled meanwhile.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        if self.delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}
