use crate::types::{DownloadUnit, MatchRecord};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// A match kept out of the pipeline, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedMatch {
    pub hub: String,
    pub match_id: String,
}

/// Data-error buckets filled while turning records into units.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Exclusions {
    pub missing_demo_url: Vec<ExcludedMatch>,
    pub missing_voting: Vec<ExcludedMatch>,
}

/// One unit per demo URL of every usable record, round indices starting at 1.
///
/// A record lands in exactly one bucket: a missing demo URL is reported
/// before missing voting data.
pub fn build_units(records: &[MatchRecord], temp_root: &Path) -> (Vec<DownloadUnit>, Exclusions) {
    let mut units = Vec::new();
    let mut exclusions = Exclusions::default();

    for record in records {
        let excluded = ExcludedMatch {
            hub: record.hub.display_name.clone(),
            match_id: record.match_id.clone(),
        };
        if record.demo_urls.is_empty() {
            debug!(match_id = %record.match_id, "no demo url, excluded");
            exclusions.missing_demo_url.push(excluded);
            continue;
        }
        if !record.voting_present || record.map_pick.is_none() {
            debug!(match_id = %record.match_id, "no voting data, excluded");
            exclusions.missing_voting.push(excluded);
            continue;
        }
        for (i, url) in record.demo_urls.iter().enumerate() {
            units.push(DownloadUnit::new(record, i as u32 + 1, url, temp_root));
        }
    }
    (units, exclusions)
}
