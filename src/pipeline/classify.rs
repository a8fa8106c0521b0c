use crate::constants::UNKNOWN_TAG;
use crate::error::{PipelineError, Result};
use crate::types::{DownloadUnit, HubKind, Tag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// A unit whose start time matched no tag of its hub's kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationGap {
    pub match_id: String,
    pub hub: String,
    pub kind: HubKind,
    pub started_at: DateTime<Utc>,
}

/// First tag in catalog order whose range contains `at` for the given kind.
///
/// Overlapping tags of one kind are a catalog error; the earlier entry wins.
pub fn resolve_tag<'a>(tags: &'a [Tag], kind: HubKind, at: DateTime<Utc>) -> Option<&'a Tag> {
    tags.iter().find(|t| t.game_kind == kind && t.contains(at))
}

pub struct Classifier {
    tags: Vec<Tag>,
}

impl Classifier {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self { tags }
    }

    /// Resolve one unit, falling back to UNKNOWN. Feeding a unit that never
    /// finished download and unzip is a programming error.
    pub fn classify_unit(&self, unit: &mut DownloadUnit) -> Result<Option<ClassificationGap>> {
        if !unit.ready_for_parse() {
            return Err(PipelineError::Invariant(format!(
                "unit {} reached classification without a downloaded demo",
                unit.signature()
            )));
        }
        match resolve_tag(&self.tags, unit.hub.kind, unit.started_at) {
            Some(tag) => {
                debug!(signature = %unit.signature(), tag = %tag.name, "classified");
                unit.resolved_tag = Some(tag.name.clone());
                Ok(None)
            }
            None => {
                warn!(
                    match_id = %unit.match_id,
                    hub = %unit.hub.display_name,
                    kind = %unit.hub.kind,
                    started_at = %unit.started_at,
                    "no tag covers this match, check the catalog date ranges"
                );
                unit.resolved_tag = Some(UNKNOWN_TAG.to_string());
                Ok(Some(ClassificationGap {
                    match_id: unit.match_id.clone(),
                    hub: unit.hub.display_name.clone(),
                    kind: unit.hub.kind,
                    started_at: unit.started_at,
                }))
            }
        }
    }

    /// Classify every parsed unit; the rest are left unset.
    pub fn classify_parsed(&self, units: &mut [DownloadUnit]) -> Result<Vec<ClassificationGap>> {
        let mut gaps = Vec::new();
        for unit in units.iter_mut().filter(|u| u.parsed()) {
            if let Some(gap) = self.classify_unit(unit)? {
                gaps.push(gap);
            }
        }
        Ok(gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hub, MatchRecord};
    use chrono::{NaiveDate, TimeZone};
    use std::path::Path;
    use tracing_test::traced_test;

    fn tag(name: &str, start: (i32, u32, u32), end: (i32, u32, u32), kind: HubKind) -> Tag {
        Tag {
            name: name.into(),
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            game_kind: kind,
        }
    }

    fn parsed_unit(kind: HubKind, at: DateTime<Utc>) -> DownloadUnit {
        let record = MatchRecord {
            match_id: "1-x".into(),
            started_at: at,
            finished_at: at,
            map_pick: Some("de_dust2".into()),
            voting_present: true,
            demo_urls: vec!["u".into()],
            hub: Hub {
                id: "eu".into(),
                display_name: "EU".into(),
                kind,
                external_guid: "g".into(),
            },
        };
        let mut unit = DownloadUnit::new(&record, 1, "u", Path::new("/scratch"));
        unit.download_success = true;
        unit.unzip_success = true;
        unit.parse_success = true;
        unit
    }

    #[test]
    fn test_kind_and_inclusive_end_date() {
        let tags = vec![
            tag("CUP1", (2024, 1, 1), (2024, 3, 31), HubKind::Championship),
            tag("SEASON3", (2024, 1, 1), (2024, 3, 31), HubKind::Hub),
        ];
        let late = Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 0).unwrap();
        assert_eq!(resolve_tag(&tags, HubKind::Hub, late).unwrap().name, "SEASON3");
        assert_eq!(resolve_tag(&tags, HubKind::Championship, late).unwrap().name, "CUP1");
        let after = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        assert!(resolve_tag(&tags, HubKind::Hub, after).is_none());
    }

    #[test]
    fn test_overlap_resolves_to_first_in_catalog_order() {
        let tags = vec![
            tag("SEASON3", (2024, 1, 1), (2024, 3, 31), HubKind::Hub),
            tag("SEASON3_EXT", (2024, 3, 1), (2024, 4, 30), HubKind::Hub),
        ];
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(resolve_tag(&tags, HubKind::Hub, at).unwrap().name, "SEASON3");
    }

    #[traced_test]
    #[test]
    fn test_gap_falls_back_to_unknown_with_one_warning() {
        let classifier = Classifier::new(vec![tag("SEASON3", (2024, 1, 1), (2024, 3, 31), HubKind::Hub)]);
        let mut units = vec![parsed_unit(HubKind::Hub, Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap())];

        let gaps = classifier.classify_parsed(&mut units).unwrap();

        assert_eq!(units[0].resolved_tag.as_deref(), Some(UNKNOWN_TAG));
        assert_eq!(units[0].remote_directory().as_deref(), Some("UNKNOWN_de_dust2"));
        assert_eq!(gaps.len(), 1);
        logs_assert(|lines: &[&str]| {
            let warnings = lines.iter().filter(|l| l.contains("WARN")).count();
            if warnings == 1 {
                Ok(())
            } else {
                Err(format!("expected exactly one warning, saw {warnings}"))
            }
        });
    }

    #[test]
    fn test_unready_unit_is_an_invariant_violation() {
        let classifier = Classifier::new(Vec::new());
        let mut unit = parsed_unit(HubKind::Hub, Utc::now());
        unit.unzip_success = false;
        assert!(matches!(classifier.classify_unit(&mut unit), Err(PipelineError::Invariant(_))));
    }
}
