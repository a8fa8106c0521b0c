use crate::constants;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub hub_api: HubApiConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    pub parse: ParseConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub radar: RadarConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub temp_root: PathBuf,
    pub parsed_root: PathBuf,
    pub radar_root: PathBuf,
    pub catalog: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("data/demos"),
            parsed_root: PathBuf::from("data/parsed"),
            radar_root: PathBuf::from("data/radar"),
            catalog: PathBuf::from("catalog.toml"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubApiConfig {
    pub base_url: String,
    /// Overridden by `HUB_API_TOKEN` when set.
    pub token: String,
    pub page_limit: u32,
    pub max_page_retries: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HubApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.faceit.com/data/v4".to_string(),
            token: String::new(),
            page_limit: constants::HUB_PAGE_LIMIT,
            max_page_retries: constants::MAX_PAGE_RETRIES,
            retry_delay_secs: constants::RETRY_DELAY_SECS,
            timeout_secs: constants::HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: constants::DOWNLOAD_WORKERS,
            max_attempts: constants::MAX_DOWNLOAD_ATTEMPTS,
            retry_delay_secs: constants::RETRY_DELAY_SECS,
            timeout_secs: constants::HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParseConfig {
    /// Parser executable; receives `args..`, then the source and destination directories.
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_parse_workers")]
    pub workers: usize,
    #[serde(default = "default_parse_timeout")]
    pub timeout_secs: u64,
}

fn default_parse_workers() -> usize {
    constants::PARSE_WORKERS
}

fn default_parse_timeout() -> u64 {
    constants::PARSE_TIMEOUT_SECS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// HTTP artifact store; files are PUT to `<base_url>/<directory>/<file>`.
    pub base_url: Option<String>,
    /// Filesystem mirror used instead of the HTTP store when set.
    pub local_mirror: Option<PathBuf>,
    /// Overridden by `UPLOAD_TOKEN` when set.
    pub token: String,
    pub build_endpoint: Option<String>,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            local_mirror: None,
            token: String::new(),
            build_endpoint: None,
            max_attempts: constants::MAX_UPLOAD_ATTEMPTS,
            retry_delay_secs: constants::RETRY_DELAY_SECS,
            timeout_secs: constants::HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Content store serving `<base_url>/<map>/<file>` overview assets.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Receives the rendered report as a plain-text POST after each run.
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        let mut config = Self::from_toml(&config_content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Secrets live in the environment (or `.env`), never in the file.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("HUB_API_TOKEN") {
            if !token.trim().is_empty() {
                self.hub_api.token = token;
            }
        }
        if let Ok(token) = std::env::var("UPLOAD_TOKEN") {
            if !token.trim().is_empty() {
                self.upload.token = token;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.download.workers == 0 || self.parse.workers == 0 {
            return Err(PipelineError::Config("worker counts must be at least 1".into()));
        }
        if self.download.max_attempts == 0 || self.upload.max_attempts == 0 {
            return Err(PipelineError::Config("attempt counts must be at least 1".into()));
        }
        if self.hub_api.page_limit == 0 {
            return Err(PipelineError::Config("hub_api.page_limit must be at least 1".into()));
        }
        if self.upload.base_url.is_none() && self.upload.local_mirror.is_none() {
            return Err(PipelineError::Config(
                "one of upload.base_url or upload.local_mirror is required".into(),
            ));
        }
        Ok(())
    }

    pub fn page_retry_delay(&self) -> Duration {
        Duration::from_secs(self.hub_api.retry_delay_secs)
    }

    pub fn download_retry_delay(&self) -> Duration {
        Duration::from_secs(self.download.retry_delay_secs)
    }

    pub fn upload_retry_delay(&self) -> Duration {
        Duration::from_secs(self.upload.retry_delay_secs)
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_secs(self.parse.timeout_secs)
    }
}
