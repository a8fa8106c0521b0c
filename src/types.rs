use crate::constants::{ARCHIVE_EXTENSION, DEMO_EXTENSION};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which match-history endpoint family a hub is served from.
///
/// Tags carry the same kind so that league seasons and championship seasons
/// with overlapping dates resolve independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubKind {
    Hub,
    Championship,
}

impl HubKind {
    /// Path segment used by the match-history API.
    pub fn api_segment(&self) -> &'static str {
        match self {
            HubKind::Hub => "hubs",
            HubKind::Championship => "championships",
        }
    }
}

impl fmt::Display for HubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubKind::Hub => write!(f, "hub"),
            HubKind::Championship => write!(f, "championship"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    pub id: String,
    pub display_name: String,
    pub kind: HubKind,
    pub external_guid: String,
}

impl Hub {
    /// Directory-safe form of the display name.
    pub fn folder_name(&self) -> String {
        sanitize_segment(&self.display_name)
    }
}

/// Season/region classification with an inclusive UTC date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub game_kind: HubKind,
}

impl Tag {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.start_date <= day && day <= self.end_date
    }

    /// An inverted range covers no dates at all.
    pub fn is_inverted(&self) -> bool {
        self.start_date > self.end_date
    }

    pub fn overlaps(&self, other: &Tag) -> bool {
        self.game_kind == other.game_kind
            && !self.is_inverted()
            && !other.is_inverted()
            && self.start_date <= other.end_date
            && other.start_date <= self.end_date
    }
}

/// One finished match as reported by a hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub map_pick: Option<String>,
    pub voting_present: bool,
    pub demo_urls: Vec<String>,
    pub hub: Hub,
}

/// Result of pushing one file to the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub directory: String,
    pub file_name: String,
    pub success: bool,
    pub response: String,
}

/// One demo recording of one match: the unit of work of every stage.
///
/// Created by the fetch stage, mutated in place by the coordinators and
/// dropped at the end of the run. Files on disk are the only persisted state.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadUnit {
    pub hub: Hub,
    pub match_id: String,
    pub round_index: u32,
    pub map_name: String,
    pub demo_url: String,
    pub started_at: DateTime<Utc>,
    /// `date/hub/map`, shared by the scratch and parsed-output trees.
    pub relative_dir: PathBuf,
    /// Scratch directory holding the archive and raw demo.
    pub temp_base_path: PathBuf,

    pub skip: bool,
    pub download_success: bool,
    pub download_response: String,
    pub download_attempts: u32,
    pub downloaded_bytes: u64,
    pub unzip_success: bool,
    pub unzip_response: String,

    pub parse_success: bool,
    pub parse_response: String,
    pub parsed_output: Option<PathBuf>,

    pub resolved_tag: Option<String>,
    pub uploads: Vec<UploadRecord>,
}

impl DownloadUnit {
    pub fn new(record: &MatchRecord, round_index: u32, demo_url: &str, temp_root: &Path) -> Self {
        let map_name = record.map_pick.clone().unwrap_or_else(|| "unknown_map".to_string());
        let relative_dir = PathBuf::from(record.started_at.format("%Y-%m-%d").to_string())
            .join(record.hub.folder_name())
            .join(sanitize_segment(&map_name));
        Self {
            hub: record.hub.clone(),
            match_id: record.match_id.clone(),
            round_index,
            map_name,
            demo_url: demo_url.to_string(),
            started_at: record.started_at,
            temp_base_path: temp_root.join(&relative_dir),
            relative_dir,
            skip: false,
            download_success: false,
            download_response: String::new(),
            download_attempts: 0,
            downloaded_bytes: 0,
            unzip_success: false,
            unzip_response: String::new(),
            parse_success: false,
            parse_response: String::new(),
            parsed_output: None,
            resolved_tag: None,
            uploads: Vec::new(),
        }
    }

    /// `<round>_<match_id>`: embedded in every file name derived from this unit.
    pub fn signature(&self) -> String {
        format!("{}_{}", self.round_index, self.match_id)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.temp_base_path
            .join(format!("{}.{}", self.signature(), ARCHIVE_EXTENSION))
    }

    pub fn demo_path(&self) -> PathBuf {
        self.temp_base_path
            .join(format!("{}.{}", self.signature(), DEMO_EXTENSION))
    }

    pub fn parsed_dir(&self, parsed_root: &Path) -> PathBuf {
        parsed_root.join(&self.relative_dir)
    }

    pub fn ready_for_parse(&self) -> bool {
        !self.skip && self.download_success && self.unzip_success
    }

    pub fn parsed(&self) -> bool {
        self.ready_for_parse() && self.parse_success
    }

    /// Remote directory for this unit's artifacts, available once classified.
    pub fn remote_directory(&self) -> Option<String> {
        self.resolved_tag
            .as_ref()
            .map(|tag| format!("{}_{}", tag, self.map_name))
    }
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
