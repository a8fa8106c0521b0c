//! Fetch phase metrics: hub match-history pagination.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct FetchMetrics;

impl FetchMetrics {
    pub fn record_page(duration_secs: f64, items: usize) {
        ::metrics::counter!(phase_metric!(counter, "fetch", "pages")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "fetch", "page_duration_seconds"))
            .record(duration_secs);
        ::metrics::histogram!(phase_metric!(histogram, "fetch", "page_items")).record(items as f64);
    }

    pub fn record_page_retry() {
        ::metrics::counter!(phase_metric!(counter, "fetch", "page_retries")).increment(1);
    }

    pub fn record_hub_failed() {
        ::metrics::counter!(phase_metric!(counter, "fetch", "hubs_failed")).increment(1);
    }

    pub fn record_matches(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "fetch", "matches")).increment(count as u64);
    }
}

impl PhaseMetrics for FetchMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(phase_metric!(counter, "fetch", "pages"));
        let _ = ::metrics::counter!(phase_metric!(counter, "fetch", "page_retries"));
        let _ = ::metrics::counter!(phase_metric!(counter, "fetch", "hubs_failed"));
        let _ = ::metrics::counter!(phase_metric!(counter, "fetch", "matches"));
        let _ = ::metrics::histogram!(phase_metric!(histogram, "fetch", "page_duration_seconds"));
        let _ = ::metrics::histogram!(phase_metric!(histogram, "fetch", "page_items"));
    }

    fn phase_name() -> &'static str {
        "fetch"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "fetch", "pages"),
                metric_type: MetricType::Counter,
                help: "Match-history pages fetched",
            },
            MetricDoc {
                name: phase_metric!(counter, "fetch", "page_retries"),
                metric_type: MetricType::Counter,
                help: "Page fetches retried after a transport failure",
            },
            MetricDoc {
                name: phase_metric!(counter, "fetch", "hubs_failed"),
                metric_type: MetricType::Counter,
                help: "Hubs abandoned for a run",
            },
            MetricDoc {
                name: phase_metric!(counter, "fetch", "matches"),
                metric_type: MetricType::Counter,
                help: "Finished matches discovered inside the run window",
            },
            MetricDoc {
                name: phase_metric!(histogram, "fetch", "page_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Latency of one page fetch",
            },
            MetricDoc {
                name: phase_metric!(histogram, "fetch", "page_items"),
                metric_type: MetricType::Histogram,
                help: "Items returned per page",
            },
        ]
    }
}
