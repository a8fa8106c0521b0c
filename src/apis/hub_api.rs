use crate::app::ports::HubApiPort;
use crate::error::TransportError;
use crate::types::Hub;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// One page of a hub's match history.
#[derive(Debug, Clone, Default)]
pub struct HubPage {
    pub status: u16,
    /// `None` when the body had no `items` field (or the status was not 2xx).
    pub items: Option<Vec<HubMatchItem>>,
}

impl HubPage {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

#[derive(Debug, Deserialize)]
struct HubPageBody {
    items: Option<Vec<serde_json::Value>>,
}

/// Decode a match page. Items that do not fit [`HubMatchItem`] are dropped
/// with a warning; a body that is not a page at all is an error.
pub fn decode_page_items(bytes: &[u8]) -> Result<Option<Vec<HubMatchItem>>, TransportError> {
    let body: HubPageBody = serde_json::from_slice(bytes)
        .map_err(|e| TransportError::Decode(format!("invalid match page body: {e}")))?;
    Ok(body.items.map(|items| {
        items
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<HubMatchItem>(raw) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable match item");
                    None
                }
            })
            .collect()
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HubMatchItem {
    pub match_id: String,
    #[serde(default)]
    pub status: String,
    /// Unix seconds; `0` or absent while the match is still live.
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub demo_url: Option<Vec<String>>,
    #[serde(default)]
    pub voting: Option<Voting>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Voting {
    #[serde(default)]
    pub map: Option<VotingMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VotingMap {
    #[serde(default)]
    pub pick: Vec<String>,
}

impl HubMatchItem {
    pub fn finished_at(&self) -> i64 {
        self.finished_at.unwrap_or(0)
    }

    pub fn map_pick(&self) -> Option<&str> {
        self.voting
            .as_ref()
            .and_then(|v| v.map.as_ref())
            .and_then(|m| m.pick.first())
            .map(String::as_str)
    }

    pub fn demo_urls(&self) -> Vec<String> {
        self.demo_url
            .as_ref()
            .map(|urls| urls.iter().filter(|u| !u.trim().is_empty()).cloned().collect())
            .unwrap_or_default()
    }
}

/// Match-history client for the hub data API.
pub struct ReqwestHubApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ReqwestHubApi {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn matches_url(&self, hub: &Hub) -> String {
        format!(
            "{}/{}/{}/matches",
            self.base_url,
            hub.kind.api_segment(),
            hub.external_guid
        )
    }
}

#[async_trait]
impl HubApiPort for ReqwestHubApi {
    #[instrument(skip(self, hub), fields(hub = %hub.id))]
    async fn fetch_page(&self, hub: &Hub, offset: u32, limit: u32) -> Result<HubPage, TransportError> {
        let resp = self
            .client
            .get(self.matches_url(hub))
            .query(&[
                ("type", "past".to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            debug!(status, "hub responded with non-success status");
            return Ok(HubPage { status, items: None });
        }
        let bytes = resp.bytes().await?;
        Ok(HubPage {
            status,
            items: decode_page_items(&bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HubKind;

    #[test]
    fn test_match_item_decoding() {
        let raw = r#"{
            "items": [
                {
                    "match_id": "1-aaa",
                    "status": "FINISHED",
                    "started_at": 1709400000,
                    "finished_at": 1709403000,
                    "demo_url": ["https://demos.example/1-aaa.dem.gz"],
                    "voting": {"map": {"pick": ["de_dust2"]}}
                },
                {
                    "match_id": "1-bbb",
                    "status": "FINISHED",
                    "finished_at": 1709403000,
                    "demo_url": null,
                    "voting": null
                }
            ]
        }"#;
        let items = decode_page_items(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].map_pick(), Some("de_dust2"));
        assert_eq!(items[0].demo_urls().len(), 1);
        assert_eq!(items[1].map_pick(), None);
        assert!(items[1].demo_urls().is_empty());
        assert_eq!(items[1].started_at, None);
    }

    #[test]
    fn test_missing_items_field_decodes_to_none() {
        let items = decode_page_items(br#"{"start": 0, "end": 0}"#).unwrap();
        assert!(items.is_none());
    }

    #[test]
    fn test_item_without_match_id_is_skipped() {
        let raw = br#"{
            "items": [
                {"status": "FINISHED", "finished_at": 1709403000},
                {"match_id": "1-ccc", "status": "FINISHED", "finished_at": 1709403000}
            ]
        }"#;
        let items = decode_page_items(raw).unwrap().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].match_id, "1-ccc");
    }

    #[test]
    fn test_non_json_body_is_not_retryable() {
        let err = decode_page_items(b"<html>gateway</html>").unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_matches_url_uses_kind_segment() {
        let api = ReqwestHubApi::new("https://api.example/v4/", "t", Duration::from_secs(5)).unwrap();
        let hub = Hub {
            id: "eu".into(),
            display_name: "EU".into(),
            kind: HubKind::Championship,
            external_guid: "abc".into(),
        };
        assert_eq!(api.matches_url(&hub), "https://api.example/v4/championships/abc/matches");
    }
}
