//! Drives one acquisition run: fetch, download, parse, classify, upload, report.
//!
//! Stages run strictly in sequence. Each one receives the complete unit set
//! produced by its predecessor, so a stage never sees half-finished work.

use crate::apis::hub_api::ReqwestHubApi;
use crate::app::ports::{
    ArchiveTransportPort, ArtifactStorePort, DedupIndexPort, HubApiPort, HubCatalogPort, ParserPort,
    RadarResolverPort, RebuildPort, ReportSinkPort,
};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::infra::artifact_store::{HttpArtifactStore, LocalArtifactStore};
use crate::infra::catalog::FileHubCatalog;
use crate::infra::dedup_fs::FsDedupIndex;
use crate::infra::http_client::{HttpRebuildClient, ReqwestArchiveTransport, WebhookReportSink};
use crate::infra::parser_process::ProcessParser;
use crate::infra::radar::HttpRadarResolver;
use crate::pipeline::classify::Classifier;
use crate::pipeline::download::DownloadCoordinator;
use crate::pipeline::fetcher::MatchFetcher;
use crate::pipeline::parse::ParseCoordinator;
use crate::pipeline::report::{ReportBuilder, ReportInput, RunReport};
use crate::pipeline::units::build_units;
use crate::pipeline::upload::UploadCoordinator;
use crate::pipeline::{RetryPolicy, RunWindow};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// External collaborators of a run.
#[derive(Clone)]
pub struct PipelineServices {
    pub catalog: Arc<dyn HubCatalogPort>,
    pub hub_api: Arc<dyn HubApiPort>,
    pub transport: Arc<dyn ArchiveTransportPort>,
    pub dedup: Arc<dyn DedupIndexPort>,
    pub parser: Arc<dyn ParserPort>,
    pub store: Arc<dyn ArtifactStorePort>,
    pub radar: Option<Arc<dyn RadarResolverPort>>,
    pub rebuild: Option<Arc<dyn RebuildPort>>,
    pub report_sink: Option<Arc<dyn ReportSinkPort>>,
}

impl PipelineServices {
    /// Wire the HTTP, process and filesystem adapters described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http_timeout = Duration::from_secs(config.download.timeout_secs);
        let upload_timeout = Duration::from_secs(config.upload.timeout_secs);

        let hub_api = ReqwestHubApi::new(
            &config.hub_api.base_url,
            &config.hub_api.token,
            Duration::from_secs(config.hub_api.timeout_secs),
        )
        .map_err(adapter_error)?;
        let transport = ReqwestArchiveTransport::new(http_timeout).map_err(adapter_error)?;

        let store: Arc<dyn ArtifactStorePort> = match (&config.upload.local_mirror, &config.upload.base_url) {
            (Some(mirror), _) => Arc::new(LocalArtifactStore::new(mirror.clone())),
            (None, Some(base_url)) => Arc::new(
                HttpArtifactStore::new(base_url, &config.upload.token, upload_timeout).map_err(adapter_error)?,
            ),
            (None, None) => {
                return Err(PipelineError::Config("no upload target configured".into()));
            }
        };

        let radar: Option<Arc<dyn RadarResolverPort>> = match &config.radar.base_url {
            Some(url) => Some(Arc::new(HttpRadarResolver::new(url, http_timeout).map_err(adapter_error)?)),
            None => None,
        };
        let rebuild: Option<Arc<dyn RebuildPort>> = match &config.upload.build_endpoint {
            Some(url) => Some(Arc::new(HttpRebuildClient::new(url, upload_timeout).map_err(adapter_error)?)),
            None => None,
        };
        let report_sink: Option<Arc<dyn ReportSinkPort>> = match &config.report.webhook_url {
            Some(url) => Some(Arc::new(WebhookReportSink::new(url, upload_timeout).map_err(adapter_error)?)),
            None => None,
        };

        Ok(Self {
            catalog: Arc::new(FileHubCatalog::new(config.paths.catalog.clone())),
            hub_api: Arc::new(hub_api),
            transport: Arc::new(transport),
            dedup: Arc::new(FsDedupIndex),
            parser: Arc::new(ProcessParser::new(
                config.parse.program.clone(),
                config.parse.args.clone(),
                config.parse_timeout(),
            )),
            store,
            radar,
            rebuild,
            report_sink,
        })
    }
}

fn adapter_error(e: crate::error::TransportError) -> PipelineError {
    PipelineError::Config(format!("failed to build HTTP client: {e}"))
}

/// Paths, bounds and retry policies of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub temp_root: PathBuf,
    pub parsed_root: PathBuf,
    pub radar_root: PathBuf,
    pub page_limit: u32,
    pub max_page_retries: u32,
    pub page_retry_delay: Duration,
    pub download_workers: usize,
    pub download_retry: RetryPolicy,
    pub parse_workers: usize,
    pub upload_retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_root: config.paths.temp_root.clone(),
            parsed_root: config.paths.parsed_root.clone(),
            radar_root: config.paths.radar_root.clone(),
            page_limit: config.hub_api.page_limit,
            max_page_retries: config.hub_api.max_page_retries,
            page_retry_delay: config.page_retry_delay(),
            download_workers: config.download.workers,
            download_retry: RetryPolicy::new(config.download.max_attempts, config.download_retry_delay()),
            parse_workers: config.parse.workers,
            upload_retry: RetryPolicy::new(config.upload.max_attempts, config.upload_retry_delay()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run held the pipeline; nothing was touched.
    AlreadyRunning,
}

impl RunOutcome {
    pub fn text(&self) -> String {
        match self {
            RunOutcome::Completed(report) => report.render(),
            RunOutcome::AlreadyRunning => "Demo acquisition is already running".to_string(),
        }
    }
}

/// Clears the running flag when a run ends, including on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AcquisitionPipeline {
    services: PipelineServices,
    settings: PipelineSettings,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl AcquisitionPipeline {
    pub fn new(services: PipelineServices, settings: PipelineSettings) -> Self {
        Self {
            services,
            settings,
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            PipelineServices::from_config(config)?,
            PipelineSettings::from_config(config),
        ))
    }

    /// Cancelling this token stops the current and any later run; units in
    /// flight are recorded as cancelled and the report is still produced.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the whole pipeline for matches finished between `until` and `from`.
    ///
    /// Only invariant violations and catalog errors surface as `Err`; every
    /// per-unit or per-hub failure ends up in the report instead.
    #[instrument(skip(self))]
    pub async fn run_acquisition(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<RunOutcome> {
        let window = RunWindow::new(from, until);
        if !window.is_valid() {
            return Err(PipelineError::Config(format!(
                "run window ends ({until}) after it starts ({from})"
            )));
        }
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            warn!("acquisition requested while a run is in progress");
            return Ok(RunOutcome::AlreadyRunning);
        };

        let run_id = Uuid::new_v4().to_string();
        let cancel = self.cancel.child_token();
        info!(run_id = %run_id, from = %from, until = %until, "acquisition run started");

        let hubs = self.services.catalog.hubs().await?;
        let tags = self.services.catalog.tags().await?;

        let fetcher = MatchFetcher::new(
            Arc::clone(&self.services.hub_api),
            self.settings.page_limit,
            self.settings.max_page_retries,
            self.settings.page_retry_delay,
        );
        let mut fetches = Vec::with_capacity(hubs.len());
        for hub in &hubs {
            fetches.push(fetcher.fetch_hub(hub, &window, &cancel).await);
        }
        let records: Vec<_> = fetches.iter().flat_map(|f| f.records.iter().cloned()).collect();
        let (units, exclusions) = build_units(&records, &self.settings.temp_root);
        info!(matches = records.len(), units = units.len(), "matches discovered");

        let mut units = DownloadCoordinator::new(
            Arc::clone(&self.services.transport),
            Arc::clone(&self.services.dedup),
            self.settings.parsed_root.clone(),
            self.settings.download_workers,
            self.settings.download_retry,
        )
        .run(units, &cancel)
        .await?;

        ParseCoordinator::new(
            Arc::clone(&self.services.parser),
            Arc::clone(&self.services.dedup),
            self.settings.parsed_root.clone(),
            self.settings.parse_workers,
        )
        .run(&mut units, &cancel)
        .await?;

        let gaps = Classifier::new(tags).classify_parsed(&mut units)?;

        let upload = UploadCoordinator::new(
            Arc::clone(&self.services.store),
            self.services.radar.clone(),
            self.services.rebuild.clone(),
            self.settings.radar_root.clone(),
            self.settings.upload_retry,
        )
        .run(&mut units, &cancel)
        .await?;

        let report = ReportBuilder::build(ReportInput {
            run_id: &run_id,
            window,
            cancelled: cancel.is_cancelled(),
            fetches: &fetches,
            exclusions: &exclusions,
            units: &units,
            gaps: &gaps,
            upload: &upload,
        });
        info!(
            run_id = %run_id,
            total_matches = report.total_matches,
            new_matches = report.new_matches,
            failed_downloads = report.failed_downloads,
            failed_parses = report.failed_parses,
            files_uploaded = report.files_uploaded,
            "acquisition run finished"
        );

        if let Some(sink) = &self.services.report_sink {
            let sink = Arc::clone(sink);
            let text = report.render();
            let posted = tokio::spawn(async move { sink.publish(&text).await }).await?;
            if let Err(e) = posted {
                error!(run_id = %run_id, error = %e, "failed to publish run report");
            }
        }

        Ok(RunOutcome::Completed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let guard = RunningGuard::acquire(&flag);
            assert!(guard.is_some());
            assert!(RunningGuard::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::Acquire));
        assert!(RunningGuard::acquire(&flag).is_some());
    }
}
