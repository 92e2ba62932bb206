use crate::error::{Error, Result};
use crate::feed::{Item, DISCUSSION_BASE_URL};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Item as returned by the item-by-id API (`/item/<id>.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub by: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub descendants: Option<u32>,
    pub time: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub dead: bool,
}

/// One hit of the front-page search API.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub points: Option<i64>,
    pub num_comments: Option<u32>,
    pub created_at_i: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

pub struct ItemParser;

impl ItemParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_item(&self, body: &[u8]) -> Result<Item> {
        // The API answers `null` for unknown ids.
        let raw: Option<RawItem> = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidItem(format!("Failed to parse item: {}", e)))?;

        match raw {
            Some(raw) => self.validate(raw),
            None => Err(Error::InvalidItem("Item does not exist".to_string())),
        }
    }

    pub fn parse_id_list(&self, body: &[u8]) -> Result<Vec<u64>> {
        serde_json::from_slice(body)
            .map_err(|e| Error::InvalidItem(format!("Failed to parse id list: {}", e)))
    }

    pub fn parse_search(&self, body: &[u8]) -> Result<Vec<Item>> {
        let response: SearchResponse = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidItem(format!("Failed to parse search response: {}", e)))?;

        Ok(response
            .hits
            .into_iter()
            .filter_map(|hit| match self.validate_hit(hit) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::debug!("Skipping search hit: {}", e);
                    None
                }
            })
            .collect())
    }

    pub fn validate(&self, raw: RawItem) -> Result<Item> {
        if raw.deleted || raw.dead {
            return Err(Error::InvalidItem(format!("Item {} is deleted or dead", raw.id)));
        }

        if let Some(kind) = &raw.kind {
            if kind != "story" && kind != "job" && kind != "poll" {
                return Err(Error::InvalidItem(format!("Item {} has unsupported type {}", raw.id, kind)));
            }
        }

        let title = match raw.title {
            Some(title) if !title.trim().is_empty() => title,
            _ => return Err(Error::InvalidItem(format!("Item {} has no title", raw.id))),
        };

        Ok(Item {
            id: raw.id,
            title,
            url: raw.url.unwrap_or_else(|| format!("{}{}", DISCUSSION_BASE_URL, raw.id)),
            author: raw.by.unwrap_or_else(|| "unknown".to_string()),
            score: raw.score.unwrap_or(0),
            comment_count: raw.descendants.unwrap_or(0),
            published_at: parse_unix_time(raw.time)?,
        })
    }

    fn validate_hit(&self, hit: SearchHit) -> Result<Item> {
        let id: u64 = hit
            .object_id
            .parse()
            .map_err(|_| Error::InvalidItem(format!("Bad object id {}", hit.object_id)))?;

        self.validate(RawItem {
            id,
            kind: None,
            by: hit.author,
            title: hit.title,
            url: hit.url,
            score: hit.points,
            descendants: hit.num_comments,
            time: hit.created_at_i,
            deleted: false,
            dead: false,
        })
    }
}

impl Default for ItemParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_unix_time(time: Option<i64>) -> Result<DateTime<Utc>> {
    let secs = time.ok_or_else(|| Error::InvalidItem("Item has no timestamp".to_string()))?;
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| Error::InvalidItem(format!("Timestamp {} out of range", secs)))
}

pub fn validate_source_url(url: &str) -> Result<url::Url> {
    let parsed_url = url::Url::parse(url)
        .map_err(|e| Error::InvalidUrl(format!("Invalid URL {}: {}", url, e)))?;

    match parsed_url.scheme() {
        "http" | "https" => Ok(parsed_url),
        scheme => Err(Error::InvalidUrl(format!("Unsupported scheme: {}", scheme))),
    }
}
