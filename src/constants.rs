//! Pipeline limits. Each one is also the serde default of the matching
//! `config.toml` field, so a config file only needs to name what it changes.

/// Page size requested from a hub's match-history endpoint.
pub const HUB_PAGE_LIMIT: u32 = 100;

/// In-place retries of a single page fetch before a hub is abandoned.
pub const MAX_PAGE_RETRIES: u32 = 20;

/// Total download+unzip attempts per unit.
pub const MAX_DOWNLOAD_ATTEMPTS: u32 = 4;

pub const DOWNLOAD_WORKERS: usize = 8;
pub const PARSE_WORKERS: usize = 8;

pub const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Seconds between retries of a failed page, download or upload.
pub const RETRY_DELAY_SECS: u64 = 5;

/// Wall-clock bound of one external parser invocation.
pub const PARSE_TIMEOUT_SECS: u64 = 600;

/// Per-call bound for network requests.
pub const HTTP_TIMEOUT_SECS: u64 = 120;

/// Tag assigned when no catalog tag covers a match.
pub const UNKNOWN_TAG: &str = "UNKNOWN";

pub const MATCH_STATUS_FINISHED: &str = "finished";

/// Suffixes of the files a unit leaves behind in its working directory.
pub const ARCHIVE_EXTENSION: &str = "dem.gz";
pub const DEMO_EXTENSION: &str = "dem";

/// Radar cache files for a map: `<map>_radar.png` and `<map>.txt`.
pub const RADAR_IMAGE_SUFFIX: &str = "_radar.png";
pub const RADAR_META_EXTENSION: &str = "txt";
