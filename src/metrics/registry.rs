//! Registers every phase's metrics and detects name conflicts early.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::fetch::FetchMetrics>(&mut all_metrics);
    register_phase_metrics::<super::download::DownloadMetrics>(&mut all_metrics);
    register_phase_metrics::<super::parse::ParseMetrics>(&mut all_metrics);
    register_phase_metrics::<super::upload::UploadMetrics>(&mut all_metrics);

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, (&'static str, MetricDoc)>) {
    T::register_metrics();
    let phase_name = T::phase_name();

    for doc in T::metrics_documentation() {
        if let Some((existing_phase, _)) = all_metrics.get(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' is defined in both '{}' and '{}'",
                doc.name, existing_phase, phase_name
            );
        } else {
            all_metrics.insert(doc.name, (phase_name, doc));
        }
    }
}

/// Every documented metric, grouped by phase.
pub fn documentation() -> Vec<(&'static str, Vec<MetricDoc>)> {
    use super::{DownloadMetrics, FetchMetrics, ParseMetrics, UploadMetrics};
    vec![
        (FetchMetrics::phase_name(), FetchMetrics::metrics_documentation()),
        (DownloadMetrics::phase_name(), DownloadMetrics::metrics_documentation()),
        (ParseMetrics::phase_name(), ParseMetrics::metrics_documentation()),
        (UploadMetrics::phase_name(), UploadMetrics::metrics_documentation()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_are_unique_across_phases() {
        let mut names = HashSet::new();
        for (phase, docs) in documentation() {
            assert!(!docs.is_empty(), "phase {phase} documents no metrics");
            for doc in docs {
                assert!(names.insert(doc.name), "duplicate metric {}", doc.name);
                assert!(doc.name.starts_with("demo_"));
            }
        }
    }
}
