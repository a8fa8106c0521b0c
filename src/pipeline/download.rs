//! Download stage: fetch each unit's archive and decompress it into a raw demo.
//!
//! At most `workers` units are in flight. The orchestrating loop blocks on a
//! semaphore permit before spawning the next unit, so a full pool applies
//! backpressure instead of opening unbounded connections. Each worker owns its
//! unit and hands it back through the `JoinSet`.

use crate::app::ports::{ArchiveTransportPort, DedupIndexPort};
use crate::error::{PipelineError, Result};
use crate::metrics::DownloadMetrics;
use crate::pipeline::RetryPolicy;
use crate::types::DownloadUnit;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub struct DownloadCoordinator {
    transport: Arc<dyn ArchiveTransportPort>,
    dedup: Arc<dyn DedupIndexPort>,
    parsed_root: PathBuf,
    workers: usize,
    retry: RetryPolicy,
}

impl DownloadCoordinator {
    pub fn new(
        transport: Arc<dyn ArchiveTransportPort>,
        dedup: Arc<dyn DedupIndexPort>,
        parsed_root: PathBuf,
        workers: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            dedup,
            parsed_root,
            workers: workers.max(1),
            retry,
        }
    }

    /// Mark the unit as already processed when its parsed output exists.
    pub fn mark_if_processed(&self, unit: &mut DownloadUnit) -> bool {
        let dir = unit.parsed_dir(&self.parsed_root);
        if let Some(existing) = self.dedup.find_output(&dir, &unit.signature()) {
            debug!(signature = %unit.signature(), output = %existing.display(), "already processed");
            unit.skip = true;
            unit.parsed_output = Some(existing);
            DownloadMetrics::record_skip();
            return true;
        }
        false
    }

    /// Returns every unit in input order, each either skipped or terminal.
    #[instrument(skip_all, fields(units = units.len(), workers = self.workers))]
    pub async fn run(&self, units: Vec<DownloadUnit>, cancel: &CancellationToken) -> Result<Vec<DownloadUnit>> {
        let total = units.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut finished: Vec<Option<DownloadUnit>> = Vec::with_capacity(total);
        finished.resize_with(total, || None);
        let mut scheduled = 0usize;

        for (idx, mut unit) in units.into_iter().enumerate() {
            // dedup happens before any network call
            if self.mark_if_processed(&mut unit) {
                finished[idx] = Some(unit);
                continue;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Invariant(format!("download pool closed: {e}")))?;
            let transport = Arc::clone(&self.transport);
            let retry = self.retry;
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let unit = download_unit(unit, transport.as_ref(), retry, &cancel).await;
                (idx, unit)
            });
            scheduled += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            let (idx, unit) = joined?;
            finished[idx] = Some(unit);
        }

        let units = finished
            .into_iter()
            .enumerate()
            .map(|(idx, unit)| {
                unit.ok_or_else(|| PipelineError::Invariant(format!("download unit {idx} never completed")))
            })
            .collect::<Result<Vec<_>>>()?;

        let ok = units.iter().filter(|u| u.ready_for_parse()).count();
        info!(
            total,
            scheduled,
            skipped = total - scheduled,
            ready = ok,
            "download stage finished"
        );
        Ok(units)
    }
}

/// Download then unzip one unit, retrying the whole sequence.
pub async fn download_unit(
    mut unit: DownloadUnit,
    transport: &dyn ArchiveTransportPort,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> DownloadUnit {
    let archive = unit.archive_path();
    let demo = unit.demo_path();
    let started = Instant::now();

    for attempt in 1..=retry.attempts {
        if cancel.is_cancelled() {
            unit.download_response = "cancelled".to_string();
            break;
        }
        unit.download_attempts = attempt;
        unit.download_success = false;
        unit.unzip_success = false;
        DownloadMetrics::record_attempt();

        match fetch_archive(&unit, transport, &archive).await {
            Ok(bytes) => {
                unit.download_success = true;
                unit.downloaded_bytes = bytes;
                unit.download_response = format!("downloaded {bytes} bytes");
            }
            Err(e) => {
                remove_quietly(&archive).await;
                warn!(signature = %unit.signature(), attempt, error = %e, "download failed");
                unit.download_response = e;
                if attempt < retry.attempts && !retry.pause(cancel).await {
                    unit.download_response = "cancelled".to_string();
                    break;
                }
                continue;
            }
        }

        let result = {
            let (archive, demo) = (archive.clone(), demo.clone());
            tokio::task::spawn_blocking(move || gunzip(&archive, &demo)).await
        };
        // the archive is not needed after an unzip, successful or not
        remove_quietly(&archive).await;
        match result {
            Ok(Ok(bytes)) => {
                unit.unzip_success = true;
                unit.unzip_response = format!("unzipped {bytes} bytes");
                DownloadMetrics::record_success(unit.downloaded_bytes, started.elapsed().as_secs_f64());
                debug!(signature = %unit.signature(), attempt, "demo ready");
                return unit;
            }
            Ok(Err(e)) => {
                unit.unzip_response = format!("unzip failed: {e}");
            }
            Err(e) => {
                unit.unzip_response = format!("unzip task failed: {e}");
            }
        }
        DownloadMetrics::record_unzip_failure();
        warn!(signature = %unit.signature(), attempt, error = %unit.unzip_response, "unzip failed");
        if attempt < retry.attempts && !retry.pause(cancel).await {
            break;
        }
    }

    DownloadMetrics::record_failure();
    unit
}

async fn fetch_archive(
    unit: &DownloadUnit,
    transport: &dyn ArchiveTransportPort,
    archive: &Path,
) -> std::result::Result<u64, String> {
    tokio::fs::create_dir_all(&unit.temp_base_path)
        .await
        .map_err(|e| format!("failed to create {}: {}", unit.temp_base_path.display(), e))?;
    transport
        .download(&unit.demo_url, archive)
        .await
        .map_err(|e| e.to_string())
}

/// Decompress `archive` into `dest` via a `.part` file, so an interrupted
/// unzip never leaves a file under the final name.
pub fn gunzip(archive: &Path, dest: &Path) -> io::Result<u64> {
    let partial = part_path(dest);
    let result = (|| {
        let mut decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
        let mut out = BufWriter::new(File::create(&partial)?);
        let written = io::copy(&mut decoder, &mut out)?;
        out.flush()?;
        drop(out);
        std::fs::rename(&partial, dest)?;
        Ok(written)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
        let _ = std::fs::remove_file(dest);
    }
    result
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
