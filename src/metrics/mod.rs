//! Phase-organized metrics for the acquisition pipeline
//!
//! Each stage owns a submodule with its counters and histograms, so metric
//! names stay unique and every stage documents what it records.

pub mod download;
pub mod fetch;
pub mod parse;
pub mod registry;
pub mod upload;

pub use download::DownloadMetrics;
pub use fetch::FetchMetrics;
pub use parse::ParseMetrics;
pub use upload::UploadMetrics;

use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Initialize the global metrics recorder.
///
/// Idempotent. A Prometheus exporter is only started when `DEMO_METRICS_ADDR`
/// is set; otherwise the `metrics` macros are no-ops, which is what tests and
/// one-off runs want.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr_str = match std::env::var("DEMO_METRICS_ADDR") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return,
        };
        let addr = match addr_str.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid DEMO_METRICS_ADDR '{}': {}", addr_str, e);
                return;
            }
        };
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => {
                info!("Prometheus exporter listening at http://{}/metrics", addr);
                registry::register_all_metrics();
            }
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

/// Implemented by each stage's metrics collection.
pub trait PhaseMetrics {
    /// Pre-register every metric so it shows up before first use.
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
}

/// Naming convention: demo_{phase}_{metric_name}[_total]
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("demo_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("demo_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
