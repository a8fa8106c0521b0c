//! Parse stage: one external parser invocation per distinct scratch directory.

use crate::app::ports::{DedupIndexPort, ParserPort};
use crate::error::{PipelineError, Result};
use crate::metrics::ParseMetrics;
use crate::types::DownloadUnit;
use crate::constants::DEMO_EXTENSION;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Units sharing one scratch directory, parsed together.
#[derive(Debug, Clone)]
pub struct ParseGroup {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    /// Indices into the unit slice handed to [`ParseCoordinator::run`].
    pub members: Vec<usize>,
}

/// Group ready units by `temp_base_path`, in first-seen order.
pub fn group_by_source(units: &[DownloadUnit], parsed_root: &Path) -> Vec<ParseGroup> {
    let mut groups: Vec<ParseGroup> = Vec::new();
    let mut by_dir: HashMap<PathBuf, usize> = HashMap::new();
    for (idx, unit) in units.iter().enumerate() {
        if !unit.ready_for_parse() {
            continue;
        }
        match by_dir.get(&unit.temp_base_path) {
            Some(&g) => groups[g].members.push(idx),
            None => {
                by_dir.insert(unit.temp_base_path.clone(), groups.len());
                groups.push(ParseGroup {
                    source_dir: unit.temp_base_path.clone(),
                    dest_dir: unit.parsed_dir(parsed_root),
                    members: vec![idx],
                });
            }
        }
    }
    groups
}

pub struct ParseCoordinator {
    parser: Arc<dyn ParserPort>,
    dedup: Arc<dyn DedupIndexPort>,
    parsed_root: PathBuf,
    workers: usize,
}

impl ParseCoordinator {
    pub fn new(
        parser: Arc<dyn ParserPort>,
        dedup: Arc<dyn DedupIndexPort>,
        parsed_root: PathBuf,
        workers: usize,
    ) -> Self {
        Self {
            parser,
            dedup,
            parsed_root,
            workers: workers.max(1),
        }
    }

    /// Parse every ready unit in place. Units that are skipped or failed
    /// download are left untouched.
    #[instrument(skip_all, fields(workers = self.workers))]
    pub async fn run(&self, units: &mut [DownloadUnit], cancel: &CancellationToken) -> Result<()> {
        let groups = group_by_source(units, &self.parsed_root);
        info!(groups = groups.len(), "parsing scratch directories");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for (g, group) in groups.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Invariant(format!("parse pool closed: {e}")))?;
            let members: HashSet<PathBuf> = group.members.iter().map(|&i| units[i].demo_path()).collect();
            clear_stale_demos(&group.source_dir, &members);
            let parser = Arc::clone(&self.parser);
            let (source, dest) = (group.source_dir.clone(), group.dest_dir.clone());
            tasks.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let result = parser.parse(&source, &dest).await;
                ParseMetrics::record_invocation(started.elapsed().as_secs_f64(), result.is_ok());
                (g, result)
            });
        }

        let mut results: Vec<Option<std::result::Result<String, String>>> = vec![None; groups.len()];
        while let Some(joined) = tasks.join_next().await {
            let (g, result) = joined?;
            results[g] = Some(result);
        }

        for (group, result) in groups.iter().zip(results) {
            let result = result.unwrap_or_else(|| Err("cancelled".to_string()));
            self.settle_group(units, group, result);
        }
        Ok(())
    }

    fn settle_group(&self, units: &mut [DownloadUnit], group: &ParseGroup, result: std::result::Result<String, String>) {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    source = %group.source_dir.display(),
                    units = group.members.len(),
                    error = %e,
                    "parse failed for directory"
                );
                for &idx in &group.members {
                    units[idx].parse_success = false;
                    units[idx].parse_response = e.clone();
                }
                return;
            }
        };

        for &idx in &group.members {
            let unit = &mut units[idx];
            // exit status alone is not trusted, the output must be on disk
            match self.dedup.find_output(&group.dest_dir, &unit.signature()) {
                Some(output) => {
                    debug!(signature = %unit.signature(), output = %output.display(), "parsed");
                    unit.parse_success = true;
                    unit.parse_response = response.clone();
                    unit.parsed_output = Some(output);
                    remove_raw_demo(unit);
                }
                None => {
                    ParseMetrics::record_missing_output();
                    warn!(signature = %unit.signature(), "parser reported success but produced no output");
                    unit.parse_success = false;
                    unit.parse_response = format!("no output for {} in {}", unit.signature(), group.dest_dir.display());
                }
            }
        }
    }
}

/// Remove demos left over from earlier runs so the parser only sees the
/// units scheduled in this one.
fn clear_stale_demos(source_dir: &Path, keep: &HashSet<PathBuf>) {
    let entries = match std::fs::read_dir(source_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %source_dir.display(), error = %e, "cannot list scratch directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_demo = path.extension().and_then(|e| e.to_str()) == Some(DEMO_EXTENSION);
        if !is_demo || keep.contains(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "removed stale demo"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale demo"),
        }
    }
}

fn remove_raw_demo(unit: &DownloadUnit) {
    let demo = unit.demo_path();
    if let Err(e) = std::fs::remove_file(&demo) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %demo.display(), error = %e, "failed to remove raw demo");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::dedup_fs::FsDedupIndex;
    use crate::types::{Hub, HubKind, MatchRecord};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writes `<demo stem>.json` for every `.dem` in the source directory.
    #[derive(Default)]
    struct RecordingParser {
        calls: Mutex<Vec<PathBuf>>,
        fail: bool,
        silent: bool,
        hold: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ParserPort for RecordingParser {
        async fn parse(&self, source_dir: &Path, dest_dir: &Path) -> std::result::Result<String, String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }
            let result = self.write_outputs(source_dir, dest_dir);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    impl RecordingParser {
        fn write_outputs(&self, source_dir: &Path, dest_dir: &Path) -> std::result::Result<String, String> {
            self.calls.lock().unwrap().push(source_dir.to_path_buf());
            if self.fail {
                return Err("parser exited with exit status: 1".into());
            }
            std::fs::create_dir_all(dest_dir).unwrap();
            if !self.silent {
                for entry in std::fs::read_dir(source_dir).unwrap() {
                    let path = entry.unwrap().path();
                    if path.extension().and_then(|e| e.to_str()) == Some("dem") {
                        let stem = path.file_stem().unwrap().to_string_lossy().to_string();
                        std::fs::write(dest_dir.join(format!("{stem}.json")), b"{}").unwrap();
                    }
                }
            }
            Ok("ok".into())
        }
    }

    fn ready_unit(temp_root: &Path, id: &str, round: u32, map: &str) -> DownloadUnit {
        let record = MatchRecord {
            match_id: id.into(),
            started_at: Utc.with_ymd_and_hms(2024, 3, 2, 20, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2024, 3, 2, 21, 0, 0).unwrap(),
            map_pick: Some(map.into()),
            voting_present: true,
            demo_urls: vec!["u".into()],
            hub: Hub {
                id: "eu".into(),
                display_name: "EU".into(),
                kind: HubKind::Hub,
                external_guid: "g".into(),
            },
        };
        let mut unit = DownloadUnit::new(&record, round, "u", temp_root);
        std::fs::create_dir_all(&unit.temp_base_path).unwrap();
        std::fs::write(unit.demo_path(), b"demo").unwrap();
        unit.download_success = true;
        unit.unzip_success = true;
        unit
    }

    fn coordinator(parser: Arc<RecordingParser>, parsed_root: &Path) -> ParseCoordinator {
        ParseCoordinator::new(parser, Arc::new(FsDedupIndex), parsed_root.to_path_buf(), 8)
    }

    #[tokio::test]
    async fn test_shared_directory_parsed_once() {
        let temp = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parser = Arc::new(RecordingParser::default());
        let mut units = vec![
            ready_unit(temp.path(), "1-a", 1, "de_dust2"),
            ready_unit(temp.path(), "1-a", 2, "de_dust2"),
            ready_unit(temp.path(), "1-b", 1, "de_mirage"),
        ];
        let mut skipped = ready_unit(temp.path(), "1-c", 1, "de_nuke");
        skipped.skip = true;
        units.push(skipped);

        coordinator(parser.clone(), parsed.path())
            .run(&mut units, &CancellationToken::new())
            .await
            .unwrap();

        let calls = parser.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(units[..3].iter().all(|u| u.parse_success));
        assert!(!units[3].parse_success);
        assert_eq!(
            units[1].parsed_output.as_deref(),
            Some(units[1].parsed_dir(parsed.path()).join("2_1-a.json").as_path())
        );
        assert!(!units[0].demo_path().exists());
    }

    #[tokio::test]
    async fn test_failure_recorded_against_every_unit_in_directory() {
        let temp = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parser = Arc::new(RecordingParser {
            fail: true,
            ..Default::default()
        });
        let mut units = vec![
            ready_unit(temp.path(), "1-a", 1, "de_dust2"),
            ready_unit(temp.path(), "1-a", 2, "de_dust2"),
        ];

        coordinator(parser.clone(), parsed.path())
            .run(&mut units, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(parser.calls.lock().unwrap().len(), 1);
        for unit in &units {
            assert!(!unit.parse_success);
            assert!(unit.parse_response.contains("exit status"));
            // raw demo stays for the next attempt
            assert!(unit.demo_path().exists());
        }
    }

    #[tokio::test]
    async fn test_success_without_output_is_a_failure() {
        let temp = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parser = Arc::new(RecordingParser {
            silent: true,
            ..Default::default()
        });
        let mut units = vec![ready_unit(temp.path(), "1-a", 1, "de_dust2")];

        coordinator(parser, parsed.path())
            .run(&mut units, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!units[0].parse_success);
        assert!(units[0].parse_response.starts_with("no output"));
    }

    #[tokio::test]
    async fn test_never_more_than_worker_cap_parsing() {
        let temp = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parser = Arc::new(RecordingParser {
            hold: Duration::from_millis(30),
            ..Default::default()
        });
        let mut units: Vec<DownloadUnit> = (0..20)
            .map(|i| ready_unit(temp.path(), &format!("1-{i:02}"), 1, &format!("map_{i:02}")))
            .collect();

        coordinator(parser.clone(), parsed.path())
            .run(&mut units, &CancellationToken::new())
            .await
            .unwrap();

        let peak = parser.peak.load(Ordering::SeqCst);
        assert!(peak <= 8, "peak {peak}");
        assert!(peak > 1, "parses never overlapped");
        assert_eq!(parser.calls.lock().unwrap().len(), 20);
        assert!(units.iter().all(|u| u.parse_success));
    }

    #[tokio::test]
    async fn test_leftover_demo_from_earlier_run_is_not_parsed() {
        let temp = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parser = Arc::new(RecordingParser::default());
        let mut units = vec![ready_unit(temp.path(), "1-a", 1, "de_dust2")];
        let leftover = units[0].temp_base_path.join("1_1-zzz.dem");
        std::fs::write(&leftover, b"old demo").unwrap();

        coordinator(parser, parsed.path())
            .run(&mut units, &CancellationToken::new())
            .await
            .unwrap();

        let dest = units[0].parsed_dir(parsed.path());
        assert!(units[0].parse_success);
        assert!(dest.join("1_1-a.json").exists());
        assert!(!dest.join("1_1-zzz.json").exists());
        assert!(!leftover.exists());
    }
}
