//! Download phase metrics: archive transfer and decompression.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct DownloadMetrics;

impl DownloadMetrics {
    pub fn record_attempt() {
        ::metrics::counter!(phase_metric!(counter, "download", "attempts")).increment(1);
    }

    pub fn record_success(bytes: u64, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "download", "success")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "download", "bytes")).increment(bytes);
        ::metrics::histogram!(phase_metric!(histogram, "download", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_failure() {
        ::metrics::counter!(phase_metric!(counter, "download", "failures")).increment(1);
    }

    pub fn record_unzip_failure() {
        ::metrics::counter!(phase_metric!(counter, "download", "unzip_failures")).increment(1);
    }

    pub fn record_skip() {
        ::metrics::counter!(phase_metric!(counter, "download", "skipped")).increment(1);
    }
}

impl PhaseMetrics for DownloadMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(phase_metric!(counter, "download", "attempts"));
        let _ = ::metrics::counter!(phase_metric!(counter, "download", "success"));
        let _ = ::metrics::counter!(phase_metric!(counter, "download", "bytes"));
        let _ = ::metrics::counter!(phase_metric!(counter, "download", "failures"));
        let _ = ::metrics::counter!(phase_metric!(counter, "download", "unzip_failures"));
        let _ = ::metrics::counter!(phase_metric!(counter, "download", "skipped"));
        let _ = ::metrics::histogram!(phase_metric!(histogram, "download", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "download"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "download", "attempts"),
                metric_type: MetricType::Counter,
                help: "Download+unzip attempts, retries included",
            },
            MetricDoc {
                name: phase_metric!(counter, "download", "success"),
                metric_type: MetricType::Counter,
                help: "Units downloaded and decompressed",
            },
            MetricDoc {
                name: phase_metric!(counter, "download", "bytes"),
                metric_type: MetricType::Counter,
                help: "Compressed bytes downloaded",
            },
            MetricDoc {
                name: phase_metric!(counter, "download", "failures"),
                metric_type: MetricType::Counter,
                help: "Units that exhausted their attempts",
            },
            MetricDoc {
                name: phase_metric!(counter, "download", "unzip_failures"),
                metric_type: MetricType::Counter,
                help: "Archives that failed to decompress",
            },
            MetricDoc {
                name: phase_metric!(counter, "download", "skipped"),
                metric_type: MetricType::Counter,
                help: "Units skipped because their output already exists",
            },
            MetricDoc {
                name: phase_metric!(histogram, "download", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of a successful download+unzip",
            },
        ]
    }
}
