use crate::app::ports::ArtifactStorePort;
use crate::error::TransportError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Artifact store reached over HTTP: `PUT <base>/<directory>/<file>`.
/// The store creates directories on first write.
pub struct HttpArtifactStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpArtifactStore {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn object_url(&self, directory: &str, file_name: &str) -> String {
        format!("{}/{}/{}", self.base_url, directory, file_name)
    }
}

#[async_trait]
impl ArtifactStorePort for HttpArtifactStore {
    async fn upload(&self, directory: &str, file_name: &str, local_path: &Path) -> Result<String, TransportError> {
        let bytes = tokio::fs::read(local_path).await?;
        let size = bytes.len();
        let mut req = self.client.put(self.object_url(directory, file_name)).body(bytes);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if (200..=299).contains(&status) {
            debug!(directory, file_name, size, "uploaded artifact");
            Ok(format!("{status} {body}").trim().to_string())
        } else {
            Err(TransportError::Status { status, body })
        }
    }
}

/// Copies artifacts into a local mirror tree; used for dry runs.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStorePort for LocalArtifactStore {
    async fn upload(&self, directory: &str, file_name: &str, local_path: &Path) -> Result<String, TransportError> {
        let dir = self.root.join(directory);
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(file_name);
        let copied = tokio::fs::copy(local_path, &target).await?;
        Ok(format!("copied {} bytes to {}", copied, target.display()))
    }
}
