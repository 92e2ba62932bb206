//! Interchangeable retrieval strategies.
//!
//! A [`Source`] knows how to produce a list of items; it knows nothing about
//! caching, retries or ordering. The pipeline walks an ordered list of them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{SourceConfig, SourceKind};
use crate::error::{Error, Result};
use crate::feed::fetcher::ItemFetcher;
use crate::feed::parser::{validate_source_url, ItemParser};
use crate::feed::Item;

/// Placeholder substituted with the URL-encoded target in proxy templates.
pub const PROXY_URL_PLACEHOLDER: &str = "{url}";

/// How the pipeline should drive one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub timeout: Duration,
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl AttemptPolicy {
    pub fn single(timeout: Duration) -> Self {
        Self {
            timeout,
            attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    pub fn with_retries(timeout: Duration, attempts: u32, base_backoff: Duration) -> Self {
        Self {
            timeout,
            attempts: attempts.max(1),
            base_backoff,
        }
    }

    /// Delay before retry number `retry` (0-based): base, 2×base, 4×base...
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << retry.min(16))
    }
}

#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn policy(&self) -> &AttemptPolicy;

    /// Fetch up to `limit` items. A partial result is fine; an empty one is
    /// an error.
    async fn fetch(&self, limit: usize) -> Result<Vec<Item>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxied { template: String },
}

/// The item-by-id API, reached either directly or through a proxy.
pub struct ItemApiSource {
    name: String,
    base_url: String,
    route: Route,
    fetcher: ItemFetcher,
    policy: AttemptPolicy,
}

impl ItemApiSource {
    pub fn direct(name: &str, base_url: &str, fetcher: ItemFetcher, policy: AttemptPolicy) -> Result<Self> {
        validate_source_url(base_url)?;

        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            route: Route::Direct,
            fetcher,
            policy,
        })
    }

    pub fn proxied(
        name: &str,
        base_url: &str,
        template: &str,
        fetcher: ItemFetcher,
        policy: AttemptPolicy,
    ) -> Result<Self> {
        validate_source_url(base_url)?;

        if !template.contains(PROXY_URL_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "Proxy template for source '{}' must contain {}",
                name, PROXY_URL_PLACEHOLDER
            )));
        }
        validate_source_url(&template.replace(PROXY_URL_PLACEHOLDER, ""))?;

        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            route: Route::Proxied {
                template: template.to_string(),
            },
            fetcher,
            policy,
        })
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn route_url(&self, target: &str) -> String {
        match &self.route {
            Route::Direct => target.to_string(),
            Route::Proxied { template } => {
                let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
                template.replace(PROXY_URL_PLACEHOLDER, &encoded)
            }
        }
    }

    fn id_list_url(&self) -> String {
        self.route_url(&format!("{}/topstories.json", self.base_url))
    }

    fn item_url(&self, id: u64) -> String {
        self.route_url(&format!("{}/item/{}.json", self.base_url, id))
    }
}

#[async_trait]
impl Source for ItemApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> &AttemptPolicy {
        &self.policy
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Item>> {
        let ids = self.fetcher.fetch_ids(&self.id_list_url()).await?;
        if ids.is_empty() {
            return Err(Error::InvalidItem(format!("{} returned an empty story list", self.name)));
        }

        let items = self
            .fetcher
            .fetch_items(&ids, limit, |id| self.item_url(id))
            .await;

        if items.is_empty() {
            return Err(Error::InvalidItem(format!("{} yielded no valid items", self.name)));
        }

        Ok(items)
    }
}

/// Front-page search API: one request returns complete items.
pub struct FrontPageSource {
    name: String,
    base_url: String,
    fetcher: ItemFetcher,
    policy: AttemptPolicy,
}

impl FrontPageSource {
    pub fn new(name: &str, base_url: &str, fetcher: ItemFetcher, policy: AttemptPolicy) -> Result<Self> {
        validate_source_url(base_url)?;

        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            fetcher,
            policy,
        })
    }

    fn search_url(&self, limit: usize) -> String {
        format!("{}/search?tags=front_page&hitsPerPage={}", self.base_url, limit)
    }
}

#[async_trait]
impl Source for FrontPageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> &AttemptPolicy {
        &self.policy
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Item>> {
        let body = self.fetcher.get_bytes(&self.search_url(limit)).await?;
        let mut items = ItemParser::new().parse_search(&body)?;

        if items.is_empty() {
            return Err(Error::InvalidItem(format!("{} yielded no valid items", self.name)));
        }

        items.truncate(limit);
        Ok(items)
    }
}

/// Build the ordered source list from configuration.
pub fn build_sources(configs: &[SourceConfig], fetcher: &ItemFetcher) -> Result<Vec<Arc<dyn Source>>> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::with_capacity(configs.len());

    for config in configs {
        let policy = AttemptPolicy::with_retries(
            Duration::from_secs(config.timeout_secs),
            config.attempts,
            Duration::from_secs(config.backoff_secs),
        );

        let source: Arc<dyn Source> = match config.kind {
            SourceKind::Direct => Arc::new(ItemApiSource::direct(
                &config.name,
                &config.base_url,
                fetcher.clone(),
                policy,
            )?),
            SourceKind::Proxy => {
                let template = config.proxy.as_deref().ok_or_else(|| {
                    Error::Config(format!("Source '{}' is a proxy but has no proxy template", config.name))
                })?;
                Arc::new(ItemApiSource::proxied(
                    &config.name,
                    &config.base_url,
                    template,
                    fetcher.clone(),
                    policy,
                )?)
            }
            SourceKind::FrontPage => Arc::new(FrontPageSource::new(
                &config.name,
                &config.base_url,
                fetcher.clone(),
                policy,
            )?),
        };

        sources.push(source);
    }

    Ok(sources)
}
