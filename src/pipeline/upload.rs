//! Publication stage: parsed output and radar assets go to the artifact store
//! under `<tag>_<map>`, then every touched directory is rebuilt once.

use crate::app::ports::{ArtifactStorePort, RadarResolverPort, RebuildPort};
use crate::error::{PipelineError, Result, TransportError};
use crate::infra::radar::radar_cached;
use crate::metrics::UploadMetrics;
use crate::pipeline::RetryPolicy;
use crate::types::{DownloadUnit, UploadRecord};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildResponse {
    pub directory: String,
    pub success: bool,
    /// Callback body as received, or the transport error when there was none.
    pub response: String,
    /// Set when the callback answered with a non-2xx status.
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RadarFailure {
    pub directory: String,
    pub map_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadOutcome {
    /// Remote directories touched this run, in first-touched order.
    pub directories: Vec<String>,
    pub radar_failures: Vec<RadarFailure>,
    pub rebuild_responses: Vec<RebuildResponse>,
}

pub struct UploadCoordinator {
    store: Arc<dyn ArtifactStorePort>,
    radar: Option<Arc<dyn RadarResolverPort>>,
    rebuild: Option<Arc<dyn RebuildPort>>,
    radar_root: PathBuf,
    retry: RetryPolicy,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ArtifactStorePort>,
        radar: Option<Arc<dyn RadarResolverPort>>,
        rebuild: Option<Arc<dyn RebuildPort>>,
        radar_root: PathBuf,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            radar,
            rebuild,
            radar_root,
            retry,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, units: &mut [DownloadUnit], cancel: &CancellationToken) -> Result<UploadOutcome> {
        let mut outcome = UploadOutcome::default();
        let mut touched = HashSet::new();
        let mut radar_attempted = HashSet::new();

        for unit in units.iter_mut().filter(|u| u.parsed()) {
            let (directory, tag) = match (unit.remote_directory(), unit.resolved_tag.clone()) {
                (Some(d), Some(t)) => (d, t),
                _ => {
                    return Err(PipelineError::Invariant(format!(
                        "unit {} reached upload without a tag",
                        unit.signature()
                    )))
                }
            };
            let output = unit.parsed_output.clone().ok_or_else(|| {
                PipelineError::Invariant(format!("unit {} parsed without an output path", unit.signature()))
            })?;

            if touched.insert(directory.clone()) {
                outcome.directories.push(directory.clone());
            }

            if let Some(radar) = &self.radar {
                let radar_dir = self.radar_root.join(&tag).join(&unit.map_name);
                if !radar_cached(&radar_dir, &unit.map_name) && radar_attempted.insert(radar_dir.clone()) {
                    match radar.resolve(&unit.map_name, &radar_dir).await {
                        Ok(files) => {
                            UploadMetrics::record_radar_fetch(true);
                            for file in files {
                                let record = self.upload_file(&directory, &file, cancel).await;
                                unit.uploads.push(record);
                            }
                        }
                        Err(e) => {
                            UploadMetrics::record_radar_fetch(false);
                            warn!(map = %unit.map_name, directory = %directory, error = %e, "radar fetch failed");
                            outcome.radar_failures.push(RadarFailure {
                                directory: directory.clone(),
                                map_name: unit.map_name.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }

            let record = self.upload_file(&directory, &output, cancel).await;
            unit.uploads.push(record);
        }

        outcome.rebuild_responses = self.rebuild_all(&outcome.directories).await?;
        let uploaded: usize = units
            .iter()
            .flat_map(|u| u.uploads.iter())
            .filter(|r| r.success)
            .count();
        info!(
            directories = outcome.directories.len(),
            uploaded,
            "upload stage finished"
        );
        Ok(outcome)
    }

    async fn upload_file(&self, directory: &str, local_path: &Path, cancel: &CancellationToken) -> UploadRecord {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut response = String::new();
        let mut success = false;

        for attempt in 1..=self.retry.attempts {
            if cancel.is_cancelled() {
                response = "cancelled".to_string();
                break;
            }
            match self.store.upload(directory, &file_name, local_path).await {
                Ok(body) => {
                    success = true;
                    response = body;
                    break;
                }
                Err(e) => {
                    warn!(directory, file = %file_name, attempt, error = %e, "upload failed");
                    response = e.to_string();
                    if attempt < self.retry.attempts && !self.retry.pause(cancel).await {
                        response = "cancelled".to_string();
                        break;
                    }
                }
            }
        }
        UploadMetrics::record_upload(success);
        UploadRecord {
            directory: directory.to_string(),
            file_name,
            success,
            response,
        }
    }

    /// One callback per directory, run as joined tasks.
    async fn rebuild_all(&self, directories: &[String]) -> Result<Vec<RebuildResponse>> {
        let Some(rebuild) = &self.rebuild else {
            return Ok(Vec::new());
        };
        let mut tasks = JoinSet::new();
        for (idx, directory) in directories.iter().cloned().enumerate() {
            let rebuild = Arc::clone(rebuild);
            tasks.spawn(async move {
                UploadMetrics::record_rebuild();
                let result = rebuild.rebuild(&directory).await;
                (idx, directory, result)
            });
        }

        let mut responses: Vec<(usize, RebuildResponse)> = Vec::with_capacity(directories.len());
        while let Some(joined) = tasks.join_next().await {
            let (idx, directory, result) = joined?;
            let response = match result {
                Ok(body) => {
                    info!(directory = %directory, response = %body, "rebuild requested");
                    RebuildResponse {
                        directory,
                        success: true,
                        response: body,
                        status: None,
                    }
                }
                Err(TransportError::Status { status, body }) => {
                    warn!(directory = %directory, status, "rebuild callback rejected");
                    RebuildResponse {
                        directory,
                        success: false,
                        response: body,
                        status: Some(status),
                    }
                }
                Err(e) => {
                    warn!(directory = %directory, error = %e, "rebuild callback failed");
                    RebuildResponse {
                        directory,
                        success: false,
                        response: e.to_string(),
                        status: None,
                    }
                }
            };
            responses.push((idx, response));
        }
        responses.sort_by_key(|(idx, _)| *idx);
        Ok(responses.into_iter().map(|(_, r)| r).collect())
    }
}
