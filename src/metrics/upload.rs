//! Upload phase metrics: artifact uploads, radar fetches and rebuild callbacks.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct UploadMetrics;

impl UploadMetrics {
    pub fn record_upload(success: bool) {
        if success {
            ::metrics::counter!(phase_metric!(counter, "upload", "files")).increment(1);
        } else {
            ::metrics::counter!(phase_metric!(counter, "upload", "failures")).increment(1);
        }
    }

    pub fn record_radar_fetch(success: bool) {
        if success {
            ::metrics::counter!(phase_metric!(counter, "upload", "radar_fetches")).increment(1);
        } else {
            ::metrics::counter!(phase_metric!(counter, "upload", "radar_failures")).increment(1);
        }
    }

    pub fn record_rebuild() {
        ::metrics::counter!(phase_metric!(counter, "upload", "rebuilds")).increment(1);
    }
}

impl PhaseMetrics for UploadMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(phase_metric!(counter, "upload", "files"));
        let _ = ::metrics::counter!(phase_metric!(counter, "upload", "failures"));
        let _ = ::metrics::counter!(phase_metric!(counter, "upload", "radar_fetches"));
        let _ = ::metrics::counter!(phase_metric!(counter, "upload", "radar_failures"));
        let _ = ::metrics::counter!(phase_metric!(counter, "upload", "rebuilds"));
    }

    fn phase_name() -> &'static str {
        "upload"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "upload", "files"),
                metric_type: MetricType::Counter,
                help: "Files uploaded to the artifact store",
            },
            MetricDoc {
                name: phase_metric!(counter, "upload", "failures"),
                metric_type: MetricType::Counter,
                help: "Files that could not be uploaded",
            },
            MetricDoc {
                name: phase_metric!(counter, "upload", "radar_fetches"),
                metric_type: MetricType::Counter,
                help: "Maps whose radar assets were fetched",
            },
            MetricDoc {
                name: phase_metric!(counter, "upload", "radar_failures"),
                metric_type: MetricType::Counter,
                help: "Radar fetches that failed",
            },
            MetricDoc {
                name: phase_metric!(counter, "upload", "rebuilds"),
                metric_type: MetricType::Counter,
                help: "Rebuild callbacks issued",
            },
        ]
    }
}
