use crate::app::ports::{ArchiveTransportPort, RebuildPort, ReportSinkPort};
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn client_with_timeout(timeout: Duration) -> Result<reqwest::Client, TransportError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

async fn status_error(resp: reqwest::Response) -> TransportError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    TransportError::Status { status, body }
}

/// Plain GET of a demo archive, streamed to disk.
pub struct ReqwestArchiveTransport {
    client: reqwest::Client,
}

impl ReqwestArchiveTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self { client: client_with_timeout(timeout)? })
    }
}

#[async_trait]
impl ArchiveTransportPort for ReqwestArchiveTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// `GET <endpoint>?build=<directory>` against the site that indexes uploads.
pub struct HttpRebuildClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRebuildClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: client_with_timeout(timeout)?,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl RebuildPort for HttpRebuildClient {
    async fn rebuild(&self, directory: &str) -> Result<String, TransportError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("build", directory)])
            .send()
            .await?;
        // The body is opaque and reported verbatim, error pages included.
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if (200..=299).contains(&status) {
            Ok(body)
        } else {
            Err(TransportError::Status { status, body })
        }
    }
}

/// Posts the rendered run report as plain text.
pub struct WebhookReportSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookReportSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: client_with_timeout(timeout)?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ReportSinkPort for WebhookReportSink {
    async fn publish(&self, report: &str) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(report.to_string())
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(status_error(resp).await)
        }
    }
}
