use crate::apis::hub_api::HubPage;
use crate::error::{Result, TransportError};
use crate::types::{Hub, Tag};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

// Catalog side

#[async_trait]
pub trait HubCatalogPort: Send + Sync {
    async fn hubs(&self) -> Result<Vec<Hub>>;
    /// Tags in catalog order; classification depends on this order.
    async fn tags(&self) -> Result<Vec<Tag>>;
}

// Acquisition side

#[async_trait]
pub trait HubApiPort: Send + Sync {
    async fn fetch_page(&self, hub: &Hub, offset: u32, limit: u32) -> std::result::Result<HubPage, TransportError>;
}

#[async_trait]
pub trait ArchiveTransportPort: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written.
    /// A failed call may leave a partial file behind.
    async fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, TransportError>;
}

/// Lookup of already-processed units. The filesystem is the ledger today.
pub trait DedupIndexPort: Send + Sync {
    /// Parsed output in `dir` whose name encodes `signature`, if any.
    fn find_output(&self, dir: &Path, signature: &str) -> Option<PathBuf>;
}

#[async_trait]
pub trait ParserPort: Send + Sync {
    /// Convert every recording in `source_dir` into structured output in `dest_dir`.
    async fn parse(&self, source_dir: &Path, dest_dir: &Path) -> std::result::Result<String, String>;
}

// Publication side

#[async_trait]
pub trait RadarResolverPort: Send + Sync {
    /// Fetch the overview assets of `map_name` into `dest_dir`, returning the written files.
    async fn resolve(&self, map_name: &str, dest_dir: &Path) -> std::result::Result<Vec<PathBuf>, TransportError>;
}

#[async_trait]
pub trait ArtifactStorePort: Send + Sync {
    async fn upload(&self, directory: &str, file_name: &str, local_path: &Path) -> std::result::Result<String, TransportError>;
}

#[async_trait]
pub trait RebuildPort: Send + Sync {
    /// Ask the remote site to re-index `directory`; returns the body verbatim.
    async fn rebuild(&self, directory: &str) -> std::result::Result<String, TransportError>;
}

#[async_trait]
pub trait ReportSinkPort: Send + Sync {
    async fn publish(&self, report: &str) -> std::result::Result<(), TransportError>;
}
