use crate::app::ports::RadarResolverPort;
use crate::constants::{RADAR_IMAGE_SUFFIX, RADAR_META_EXTENSION};
use crate::error::TransportError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Names of the overview files cached for `map_name`.
pub fn radar_file_names(map_name: &str) -> [String; 2] {
    [
        format!("{map_name}{RADAR_IMAGE_SUFFIX}"),
        format!("{map_name}.{RADAR_META_EXTENSION}"),
    ]
}

/// True when every radar file for `map_name` is already in `dir`.
pub fn radar_cached(dir: &Path, map_name: &str) -> bool {
    radar_file_names(map_name).iter().all(|f| dir.join(f).is_file())
}

/// Pulls a map's overview image and metadata from a content store laid out
/// as `<base>/<map>/<file>`.
///
/// Files are staged under `.incoming` and renamed into place, so a failed
/// fetch never leaves a half-written file under the final name.
pub struct HttpRadarResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRadarResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RadarResolverPort for HttpRadarResolver {
    async fn resolve(&self, map_name: &str, dest_dir: &Path) -> Result<Vec<PathBuf>, TransportError> {
        let staging = dest_dir.join(".incoming");
        tokio::fs::create_dir_all(&staging).await?;

        let mut staged = Vec::new();
        for file_name in radar_file_names(map_name) {
            let url = format!("{}/{}/{}", self.base_url, map_name, file_name);
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(TransportError::Status {
                    status,
                    body: format!("radar asset {url} unavailable"),
                });
            }
            let bytes = resp.bytes().await?;
            let path = staging.join(&file_name);
            tokio::fs::write(&path, &bytes).await?;
            staged.push((path, file_name));
        }

        let mut written = Vec::new();
        for (path, file_name) in staged {
            let target = dest_dir.join(file_name);
            // rename replaces any stale file of the same name
            tokio::fs::rename(&path, &target).await?;
            written.push(target);
        }
        let _ = tokio::fs::remove_dir_all(&staging).await;
        info!(map = map_name, files = written.len(), "radar assets cached");
        Ok(written)
    }
}
