use crate::apis::hub_api::{HubMatchItem, HubPage};
use crate::app::ports::HubApiPort;
use crate::constants::MATCH_STATUS_FINISHED;
use crate::error::TransportError;
use crate::metrics::FetchMetrics;
use crate::pipeline::{RetryPolicy, RunWindow};
use crate::types::{Hub, MatchRecord};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What one hub yielded for a run.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub hub: Hub,
    pub records: Vec<MatchRecord>,
    /// Last HTTP status seen; `None` if no page ever answered.
    pub status: Option<u16>,
    pub pages: u32,
    /// Set when the hub was abandoned; records gathered before that are kept.
    pub failure: Option<String>,
}

impl FetchOutcome {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct MatchFetcher {
    api: Arc<dyn HubApiPort>,
    page_limit: u32,
    /// `attempts` counts the first try plus in-place retries of one page.
    retry: RetryPolicy,
}

impl MatchFetcher {
    pub fn new(api: Arc<dyn HubApiPort>, page_limit: u32, max_page_retries: u32, retry_delay: std::time::Duration) -> Self {
        Self {
            api,
            page_limit: page_limit.max(1),
            retry: RetryPolicy::new(max_page_retries.saturating_add(1), retry_delay),
        }
    }

    /// Walk one hub's history, newest first, until the window is covered.
    #[instrument(skip(self, hub, cancel), fields(hub = %hub.id))]
    pub async fn fetch_hub(&self, hub: &Hub, window: &RunWindow, cancel: &CancellationToken) -> FetchOutcome {
        let from_ts = window.from.timestamp();
        let until_ts = window.until.timestamp();
        let mut outcome = FetchOutcome {
            hub: hub.clone(),
            records: Vec::new(),
            status: None,
            pages: 0,
            failure: None,
        };
        let mut seen = HashSet::new();
        let mut offset = 0u32;

        'pages: loop {
            let page = match self.fetch_page_with_retry(hub, offset, cancel).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(offset, error = %e, "abandoning hub for this run");
                    FetchMetrics::record_hub_failed();
                    outcome.failure = Some(e.to_string());
                    break;
                }
            };
            outcome.pages += 1;
            outcome.status = Some(page.status);

            if !page.is_success() {
                warn!(status = page.status, offset, "hub returned non-success status");
                FetchMetrics::record_hub_failed();
                outcome.failure = Some(format!("hub responded with status {}", page.status));
                break;
            }
            let items = match page.items {
                Some(items) if !items.is_empty() => items,
                _ => break,
            };

            for item in &items {
                let finished = item.finished_at();
                if finished > from_ts {
                    // finished after the window; newer pages come first
                    continue;
                }
                if finished != 0 && finished < until_ts {
                    debug!(match_id = %item.match_id, "reached the end of the window");
                    break 'pages;
                }
                if !item.status.eq_ignore_ascii_case(MATCH_STATUS_FINISHED) {
                    continue;
                }
                // a match finishing mid-crawl shifts pagination by one
                if !seen.insert(item.match_id.clone()) {
                    continue;
                }
                outcome.records.push(to_record(hub, item));
            }
            offset += self.page_limit;
        }

        FetchMetrics::record_matches(outcome.records.len());
        info!(
            matches = outcome.records.len(),
            pages = outcome.pages,
            failed = outcome.failed(),
            "hub crawl finished"
        );
        outcome
    }

    async fn fetch_page_with_retry(
        &self,
        hub: &Hub,
        offset: u32,
        cancel: &CancellationToken,
    ) -> Result<HubPage, TransportError> {
        let mut last_error = TransportError::Cancelled;
        for attempt in 1..=self.retry.attempts {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let started = Instant::now();
            match self.api.fetch_page(hub, offset, self.page_limit).await {
                Ok(page) => {
                    let items = page.items.as_ref().map(Vec::len).unwrap_or(0);
                    FetchMetrics::record_page(started.elapsed().as_secs_f64(), items);
                    return Ok(page);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(offset, attempt, error = %e, "page fetch failed, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    warn!(offset, attempt, error = %e, "page fetch failed");
                    last_error = e;
                }
            }
            if attempt < self.retry.attempts {
                FetchMetrics::record_page_retry();
                if !self.retry.pause(cancel).await {
                    return Err(TransportError::Cancelled);
                }
            }
        }
        Err(TransportError::Network(format!(
            "page at offset {} failed after {} attempts: {}",
            offset, self.retry.attempts, last_error
        )))
    }
}

fn epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn to_record(hub: &Hub, item: &HubMatchItem) -> MatchRecord {
    let finished = item.finished_at();
    let started = item.started_at.filter(|s| *s > 0).unwrap_or(finished);
    MatchRecord {
        match_id: item.match_id.clone(),
        started_at: epoch(started),
        finished_at: epoch(finished),
        map_pick: item.map_pick().map(str::to_string),
        voting_present: item.voting.as_ref().and_then(|v| v.map.as_ref()).is_some(),
        demo_urls: item.demo_urls(),
        hub: hub.clone(),
    }
}
