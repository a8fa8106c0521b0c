use crate::app::ports::HubCatalogPort;
use crate::error::{PipelineError, Result};
use crate::types::{Hub, HubKind, Tag};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub hubs: Vec<Hub>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl CatalogFile {
    pub fn from_toml(content: &str) -> Result<Self> {
        let catalog: CatalogFile = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Duplicate hub ids are fatal. Inverted tag ranges are kept and only
    /// logged; they match nothing, so affected matches classify as UNKNOWN.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for hub in &self.hubs {
            if !seen.insert(hub.id.as_str()) {
                return Err(PipelineError::Catalog(format!("duplicate hub id '{}'", hub.id)));
            }
        }
        for tag in inverted_tags(&self.tags) {
            warn!(
                tag = %tag.name,
                start = %tag.start_date,
                end = %tag.end_date,
                "tag ends before it starts and will match nothing"
            );
        }
        Ok(())
    }
}

/// Catalog read from a TOML file on every call, so edits apply to the next run.
pub struct FileHubCatalog {
    path: PathBuf,
}

impl FileHubCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<CatalogFile> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PipelineError::Catalog(format!("Failed to read catalog '{}': {}", self.path.display(), e))
        })?;
        let catalog = CatalogFile::from_toml(&content)?;
        debug!(
            path = %self.path.display(),
            hubs = catalog.hubs.len(),
            tags = catalog.tags.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HubCatalogPort for FileHubCatalog {
    async fn hubs(&self) -> Result<Vec<Hub>> {
        Ok(self.load().await?.hubs)
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        Ok(self.load().await?.tags)
    }
}

/// Fixed catalog for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHubCatalog {
    catalog: CatalogFile,
}

impl InMemoryHubCatalog {
    pub fn new(hubs: Vec<Hub>, tags: Vec<Tag>) -> Self {
        Self {
            catalog: CatalogFile { hubs, tags },
        }
    }
}

#[async_trait]
impl HubCatalogPort for InMemoryHubCatalog {
    async fn hubs(&self) -> Result<Vec<Hub>> {
        Ok(self.catalog.hubs.clone())
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        Ok(self.catalog.tags.clone())
    }
}

/// Pairs of same-kind tags whose date ranges overlap, in catalog order.
pub fn overlapping_tags(tags: &[Tag]) -> Vec<(&Tag, &Tag)> {
    let mut out = Vec::new();
    for (i, a) in tags.iter().enumerate() {
        for b in &tags[i + 1..] {
            if a.overlaps(b) {
                out.push((a, b));
            }
        }
    }
    out
}

pub fn inverted_tags(tags: &[Tag]) -> Vec<&Tag> {
    tags.iter().filter(|t| t.is_inverted()).collect()
}

/// Uncovered stretches between consecutive tags of the same kind, as
/// `(kind, first uncovered day, last uncovered day)`.
pub fn tag_gaps(tags: &[Tag]) -> Vec<(HubKind, NaiveDate, NaiveDate)> {
    let mut gaps = Vec::new();
    for kind in [HubKind::Hub, HubKind::Championship] {
        let mut ranges: Vec<(NaiveDate, NaiveDate)> = tags
            .iter()
            .filter(|t| t.game_kind == kind && !t.is_inverted())
            .map(|t| (t.start_date, t.end_date))
            .collect();
        ranges.sort();
        let mut covered_until: Option<NaiveDate> = None;
        for (start, end) in ranges {
            if let Some(last) = covered_until {
                if let (Some(first_free), Some(last_free)) = (last.succ_opt(), start.pred_opt()) {
                    if first_free <= last_free {
                        gaps.push((kind, first_free, last_free));
                    }
                }
            }
            covered_until = Some(covered_until.map_or(end, |c| c.max(end)));
        }
    }
    gaps
}
