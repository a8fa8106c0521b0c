//! Parse phase metrics: external parser invocations.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct ParseMetrics;

impl ParseMetrics {
    pub fn record_invocation(duration_secs: f64, success: bool) {
        if success {
            ::metrics::counter!(phase_metric!(counter, "parse", "success")).increment(1);
        } else {
            ::metrics::counter!(phase_metric!(counter, "parse", "failures")).increment(1);
        }
        ::metrics::histogram!(phase_metric!(histogram, "parse", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_missing_output() {
        ::metrics::counter!(phase_metric!(counter, "parse", "missing_outputs")).increment(1);
    }
}

impl PhaseMetrics for ParseMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(phase_metric!(counter, "parse", "success"));
        let _ = ::metrics::counter!(phase_metric!(counter, "parse", "failures"));
        let _ = ::metrics::counter!(phase_metric!(counter, "parse", "missing_outputs"));
        let _ = ::metrics::histogram!(phase_metric!(histogram, "parse", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "parse"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "parse", "success"),
                metric_type: MetricType::Counter,
                help: "Directories parsed successfully",
            },
            MetricDoc {
                name: phase_metric!(counter, "parse", "failures"),
                metric_type: MetricType::Counter,
                help: "Parser runs that failed or timed out",
            },
            MetricDoc {
                name: phase_metric!(counter, "parse", "missing_outputs"),
                metric_type: MetricType::Counter,
                help: "Units with no output file after a successful parser run",
            },
            MetricDoc {
                name: phase_metric!(histogram, "parse", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of one parser run",
            },
        ]
    }
}
