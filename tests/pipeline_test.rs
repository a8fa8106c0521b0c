use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use demo_scraper::apis::hub_api::{HubMatchItem, HubPage, Voting, VotingMap};
use demo_scraper::app::ports::{ArchiveTransportPort, HubApiPort, ParserPort, RebuildPort, ReportSinkPort};
use demo_scraper::error::TransportError;
use demo_scraper::infra::artifact_store::LocalArtifactStore;
use demo_scraper::infra::catalog::InMemoryHubCatalog;
use demo_scraper::infra::dedup_fs::FsDedupIndex;
use demo_scraper::pipeline::RetryPolicy;
use demo_scraper::types::{Hub, HubKind, Tag};
use demo_scraper::{AcquisitionPipeline, PipelineServices, PipelineSettings, RunOutcome};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn eu_hub() -> Hub {
    Hub {
        id: "eu".into(),
        display_name: "EU".into(),
        kind: HubKind::Hub,
        external_guid: "eu-guid".into(),
    }
}

fn season3() -> Tag {
    Tag {
        name: "SEASON3".into(),
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        game_kind: HubKind::Hub,
    }
}

fn item(id: &str, finished: DateTime<Utc>, demo: bool) -> HubMatchItem {
    HubMatchItem {
        match_id: id.into(),
        status: "FINISHED".into(),
        started_at: Some(finished.timestamp() - 2400),
        finished_at: Some(finished.timestamp()),
        demo_url: demo.then(|| vec![format!("https://demos.example/{id}.dem.gz")]),
        voting: Some(Voting {
            map: Some(VotingMap {
                pick: vec!["de_dust2".into()],
            }),
        }),
    }
}

/// Three in-window matches (one without a demo) followed by an older one.
fn eu_history() -> Vec<HubMatchItem> {
    vec![
        item("1-aaa", at(2, 21), true),
        item("1-bbb", at(2, 20), true),
        item("1-ccc", at(2, 19), false),
        item("1-old", Utc.with_ymd_and_hms(2024, 2, 20, 12, 0, 0).unwrap(), true),
    ]
}

/// Serves a fixed history per hub, sliced by offset and limit.
struct StaticHubApi {
    history: HashMap<String, Vec<HubMatchItem>>,
}

#[async_trait]
impl HubApiPort for StaticHubApi {
    async fn fetch_page(&self, hub: &Hub, offset: u32, limit: u32) -> Result<HubPage, TransportError> {
        let items = self.history.get(&hub.external_guid).cloned().unwrap_or_default();
        let page = items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(HubPage {
            status: 200,
            items: Some(page),
        })
    }
}

/// Blocks the first page fetch until released.
#[derive(Default)]
struct GatedHubApi {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl HubApiPort for GatedHubApi {
    async fn fetch_page(&self, _hub: &Hub, _offset: u32, _limit: u32) -> Result<HubPage, TransportError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(HubPage {
            status: 200,
            items: None,
        })
    }
}

struct GzTransport {
    calls: AtomicUsize,
    always_fail: bool,
}

impl GzTransport {
    fn new(always_fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            always_fail,
        })
    }
}

#[async_trait]
impl ArchiveTransportPort for GzTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            std::fs::write(dest, b"trunc").unwrap();
            return Err(TransportError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(format!("HL2DEMO {url}").as_bytes()).unwrap();
        let bytes = enc.finish().unwrap();
        std::fs::write(dest, &bytes).unwrap();
        Ok(bytes.len() as u64)
    }
}

/// Writes `<stem>.json` for every raw demo in the source directory.
#[derive(Default)]
struct JsonParser {
    calls: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl ParserPort for JsonParser {
    async fn parse(&self, source_dir: &Path, dest_dir: &Path) -> Result<String, String> {
        self.calls.lock().unwrap().push(source_dir.to_path_buf());
        std::fs::create_dir_all(dest_dir).map_err(|e| e.to_string())?;
        for entry in std::fs::read_dir(source_dir).map_err(|e| e.to_string())? {
            let path = entry.map_err(|e| e.to_string())?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("dem") {
                let stem = path.file_stem().unwrap().to_string_lossy().to_string();
                std::fs::write(dest_dir.join(format!("{stem}.json")), b"{\"rounds\":[]}").unwrap();
            }
        }
        Ok("parsed".into())
    }
}

#[derive(Default)]
struct CountingRebuild {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl RebuildPort for CountingRebuild {
    async fn rebuild(&self, directory: &str) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(directory.to_string());
        Ok(format!("OK rebuilt {directory}"))
    }
}

#[derive(Default)]
struct CapturingSink {
    reports: Mutex<Vec<String>>,
}

#[async_trait]
impl ReportSinkPort for CapturingSink {
    async fn publish(&self, report: &str) -> Result<(), TransportError> {
        self.reports.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

struct Harness {
    root: TempDir,
    transport: Arc<GzTransport>,
    parser: Arc<JsonParser>,
    rebuild: Arc<CountingRebuild>,
    sink: Arc<CapturingSink>,
    pipeline: Arc<AcquisitionPipeline>,
}

impl Harness {
    fn new(hub_api: Arc<dyn HubApiPort>, transport: Arc<GzTransport>) -> Self {
        let root = tempfile::tempdir().unwrap();
        let parser = Arc::new(JsonParser::default());
        let rebuild = Arc::new(CountingRebuild::default());
        let sink = Arc::new(CapturingSink::default());
        let services = PipelineServices {
            catalog: Arc::new(InMemoryHubCatalog::new(vec![eu_hub()], vec![season3()])),
            hub_api,
            transport: transport.clone(),
            dedup: Arc::new(FsDedupIndex),
            parser: parser.clone(),
            store: Arc::new(LocalArtifactStore::new(root.path().join("mirror"))),
            radar: None,
            rebuild: Some(rebuild.clone()),
            report_sink: Some(sink.clone()),
        };
        let settings = PipelineSettings {
            temp_root: root.path().join("demos"),
            parsed_root: root.path().join("parsed"),
            radar_root: root.path().join("radar"),
            page_limit: 2,
            max_page_retries: 20,
            page_retry_delay: Duration::ZERO,
            download_workers: 8,
            download_retry: RetryPolicy::new(4, Duration::ZERO),
            parse_workers: 8,
            upload_retry: RetryPolicy::new(3, Duration::ZERO),
        };
        Self {
            root,
            transport,
            parser,
            rebuild,
            sink,
            pipeline: Arc::new(AcquisitionPipeline::new(services, settings)),
        }
    }

    fn eu(transport: Arc<GzTransport>) -> Self {
        let history = HashMap::from([("eu-guid".to_string(), eu_history())]);
        Self::new(Arc::new(StaticHubApi { history }), transport)
    }

    async fn run(&self) -> String {
        match self.pipeline.run_acquisition(at(3, 0), at(1, 0)).await.unwrap() {
            RunOutcome::Completed(report) => report.render(),
            RunOutcome::AlreadyRunning => panic!("pipeline unexpectedly busy"),
        }
    }
}

#[tokio::test]
async fn test_eu_run_end_to_end() {
    let h = Harness::eu(GzTransport::new(false));

    let text = h.run().await;

    assert!(text.contains("Total Matches: 3"), "{text}");
    assert!(text.contains("New Matches: 2"), "{text}");
    assert!(text.contains("Demos Downloaded: 2"), "{text}");
    assert!(text.contains("Failed Downloads: 0"), "{text}");
    assert!(text.contains("Demos Unzipped: 2"), "{text}");
    assert!(text.contains("Failed Parses: 0"), "{text}");
    assert!(text.contains("Files Uploaded: 2"), "{text}");
    assert!(text.contains("Missing Demo URL (1):\n- EU 1-ccc"), "{text}");
    assert!(text.contains("- SEASON3_de_dust2: OK rebuilt SEASON3_de_dust2"), "{text}");

    assert_eq!(h.transport.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.parser.calls.lock().unwrap().len(), 1);
    assert_eq!(*h.rebuild.calls.lock().unwrap(), vec!["SEASON3_de_dust2".to_string()]);

    let uploaded = h.root.path().join("mirror").join("SEASON3_de_dust2");
    assert!(uploaded.join("1_1-aaa.json").is_file());
    assert!(uploaded.join("1_1-bbb.json").is_file());

    // scratch is left without archives or raw demos
    let scratch = h.root.path().join("demos").join("2024-03-02").join("EU").join("de_dust2");
    assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);

    let posted = h.sink.reports.lock().unwrap().clone();
    assert_eq!(posted, vec![text]);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = Harness::eu(GzTransport::new(false));
    h.run().await;

    let text = h.run().await;

    assert!(text.contains("Total Matches: 3"), "{text}");
    assert!(text.contains("New Matches: 0"), "{text}");
    assert!(text.contains("Already Processed: 2"), "{text}");
    assert!(text.contains("Demos Downloaded: 0"), "{text}");
    assert!(text.contains("Files Uploaded: 0"), "{text}");
    assert_eq!(h.transport.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.parser.calls.lock().unwrap().len(), 1);
    assert_eq!(h.rebuild.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_downloads_still_produce_report() {
    let h = Harness::eu(GzTransport::new(true));

    let text = h.run().await;

    assert!(text.contains("New Matches: 2"), "{text}");
    assert!(text.contains("Demos Downloaded: 0"), "{text}");
    assert!(text.contains("Failed Downloads: 2"), "{text}");
    assert!(text.contains("Files Uploaded: 0"), "{text}");
    assert!(text.contains("unexpected status 502"), "{text}");
    // four attempts per unit
    assert_eq!(h.transport.calls.load(Ordering::SeqCst), 8);
    assert!(h.parser.calls.lock().unwrap().is_empty());
    assert!(h.rebuild.calls.lock().unwrap().is_empty());
    let scratch = h.root.path().join("demos").join("2024-03-02").join("EU").join("de_dust2");
    assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let api = Arc::new(GatedHubApi::default());
    let h = Harness::new(api.clone(), GzTransport::new(false));

    let pipeline = Arc::clone(&h.pipeline);
    let first = tokio::spawn(async move { pipeline.run_acquisition(at(3, 0), at(1, 0)).await });
    api.entered.notified().await;
    assert!(h.pipeline.is_running());

    let second = h.pipeline.run_acquisition(at(3, 0), at(1, 0)).await.unwrap();
    assert!(matches!(second, RunOutcome::AlreadyRunning));
    assert_eq!(second.text(), "Demo acquisition is already running");

    api.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, RunOutcome::Completed(_)));
    assert!(!h.pipeline.is_running());
}

#[tokio::test]
async fn test_cancelled_pipeline_reports_without_work() {
    let h = Harness::eu(GzTransport::new(false));
    h.pipeline.cancel_token().cancel();

    let text = h.run().await;

    assert!(text.contains("[cancelled]"), "{text}");
    assert!(text.contains("Total Matches: 0"), "{text}");
    assert!(text.contains("- EU: cancelled"), "{text}");
    assert_eq!(h.transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inverted_window_is_rejected() {
    let h = Harness::eu(GzTransport::new(false));
    assert!(h.pipeline.run_acquisition(at(1, 0), at(3, 0)).await.is_err());
    assert!(!h.pipeline.is_running());
}
