use crate::error::{Error, Result};
use crate::feed::parser::ItemParser;
use crate::feed::Item;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// HTTP client for the item-by-id API.
#[derive(Debug, Clone)]
pub struct ItemFetcher {
    client: Client,
    user_agent: String,
    batch_size: usize,
}

impl ItemFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: format!("news-shelf/{}", env!("CARGO_PKG_VERSION")),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);

        let response = self.fetch_response(url).await?;

        if !response.status().is_success() {
            return Err(Error::HttpError(format!(
                "HTTP {} for {}: {}",
                response.status().as_u16(),
                url,
                response.status().canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| Error::HttpError(format!("Failed to read response body: {}", e)))?;

        Ok(content.to_vec())
    }

    async fn fetch_response(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Request to {} timed out", url))
                } else {
                    Error::HttpError(format!("Request failed: {}", e))
                }
            })?;

        Ok(response)
    }

    pub async fn fetch_ids(&self, url: &str) -> Result<Vec<u64>> {
        let body = self.get_bytes(url).await?;
        ItemParser::new().parse_id_list(&body)
    }

    pub async fn fetch_item(&self, url: &str) -> Result<Item> {
        let body = self.get_bytes(url).await?;
        ItemParser::new().parse_item(&body)
    }

    /// Fetch items in parallel batches of `batch_size`, stopping once `limit`
    /// valid items are collected. Items that fail are skipped.
    pub async fn fetch_items<F>(&self, ids: &[u64], limit: usize, url_for: F) -> Vec<Item>
    where
        F: Fn(u64) -> String,
    {
        let mut items = Vec::with_capacity(limit.min(ids.len()));
        let mut failures = 0usize;

        for batch in ids.chunks(self.batch_size) {
            if items.len() >= limit {
                break;
            }

            let futures = batch.iter().map(|&id| {
                let url = url_for(id);
                async move { (id, self.fetch_item(&url).await) }
            });

            for (id, result) in futures::future::join_all(futures).await {
                match result {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        failures += 1;
                        debug!("Skipping item {}: {}", id, e);
                    }
                }
            }
        }

        if failures > 0 {
            warn!("{} of {} requested items could not be fetched", failures, items.len() + failures);
        }

        items.truncate(limit);
        items
    }
}
