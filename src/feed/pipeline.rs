//! Cache-first retrieval over an ordered list of sources.
//!
//! `retrieve` never fails. It serves a fresh cache hit when there is one,
//! otherwise walks the sources in order (retrying and time-boxing each as its
//! [`AttemptPolicy`](crate::feed::source::AttemptPolicy) says) and degrades to
//! the last cached snapshot, then to a fixed placeholder.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::fetcher::ItemFetcher;
use crate::feed::source::{build_sources, Source};
use crate::feed::Item;
use crate::storage::CacheStore;

/// Where the returned items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Fresh cache hit or a successful fetch.
    Fresh,
    /// Every source failed; items are from an older fetch.
    Stale,
    /// Every source failed and nothing was cached.
    Fallback,
}

/// Soft warning for the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Data may be outdated. `expired` is set past the stale threshold.
    Outdated { fetched_at: DateTime<Utc>, expired: bool },
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Serve a fresh cache entry without touching the network.
    PreferCache,
    /// Always go to the network; the cache is only a fallback.
    ForceNetwork,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub items: Vec<Item>,
    pub origin: Origin,
    pub notice: Option<Notice>,
    /// Source that produced the items, for network results.
    pub source: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Retrieval {
    pub fn is_degraded(&self) -> bool {
        self.origin != Origin::Fresh
    }
}

pub struct FetchPipeline {
    cache: Arc<CacheStore>,
    sources: Vec<Arc<dyn Source>>,
    max_items: usize,
}

impl FetchPipeline {
    pub fn new(cache: Arc<CacheStore>, sources: Vec<Arc<dyn Source>>, max_items: usize) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::Config("Fetch pipeline needs at least one source".to_string()));
        }
        if max_items == 0 {
            return Err(Error::Config("Fetch pipeline max_items must be greater than 0".to_string()));
        }

        Ok(Self {
            cache,
            sources,
            max_items,
        })
    }

    pub fn from_config(config: &Config, cache: Arc<CacheStore>) -> Result<Self> {
        let fetcher = ItemFetcher::new()?
            .with_user_agent(config.fetch.user_agent.clone())
            .with_batch_size(config.fetch.batch_size);
        let sources = build_sources(&config.sources, &fetcher)?;

        Self::new(cache, sources, config.fetch.max_items)
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub async fn retrieve(&self, now: DateTime<Utc>) -> Retrieval {
        self.retrieve_with(now, Mode::PreferCache).await
    }

    pub async fn retrieve_with(&self, now: DateTime<Utc>, mode: Mode) -> Retrieval {
        if mode == Mode::PreferCache {
            if let Some(entry) = self.cache.get().await {
                if self.cache.is_fresh(&entry, now) {
                    debug!("Serving {} cached items", entry.items.len());
                    return Retrieval {
                        items: entry.items,
                        origin: Origin::Fresh,
                        notice: None,
                        source: None,
                        fetched_at: Some(entry.fetched_at),
                    };
                }
                debug!(
                    "Cached items are {} minutes old, refetching",
                    self.cache.age(&entry, now).num_minutes()
                );
            }
        }

        let ticket = self.cache.begin_write();

        if let Some((source, items)) = self.fetch_from_sources().await {
            if !self.cache.commit(ticket, items.clone(), now).await {
                debug!("Fetched items from {} were superseded before they could be cached", source);
            }
            return Retrieval {
                items,
                origin: Origin::Fresh,
                notice: None,
                source: Some(source),
                fetched_at: Some(now),
            };
        }

        match self.cache.get().await {
            Some(entry) => {
                let expired = self.cache.is_stale(&entry, now);
                warn!(
                    "All sources failed; serving cached items from {} (may be outdated)",
                    entry.fetched_at
                );
                Retrieval {
                    items: entry.items,
                    origin: Origin::Stale,
                    notice: Some(Notice::Outdated {
                        fetched_at: entry.fetched_at,
                        expired,
                    }),
                    source: None,
                    fetched_at: Some(entry.fetched_at),
                }
            }
            None => {
                warn!("All sources failed and nothing is cached; serving offline placeholder");
                Retrieval {
                    items: placeholder_items(),
                    origin: Origin::Fallback,
                    notice: Some(Notice::Offline),
                    source: None,
                    fetched_at: None,
                }
            }
        }
    }

    /// Clear the cache, then fetch from the network.
    pub async fn force_refresh(&self, now: DateTime<Utc>) -> Retrieval {
        self.cache.clear().await;
        self.retrieve_with(now, Mode::ForceNetwork).await
    }

    async fn fetch_from_sources(&self) -> Option<(String, Vec<Item>)> {
        for source in &self.sources {
            match self.attempt_source(source.as_ref()).await {
                Ok(items) => {
                    info!("Fetched {} items from {}", items.len(), source.name());
                    return Some((source.name().to_string(), items));
                }
                Err(e) => {
                    warn!("Source {} failed: {}", source.name(), e);
                }
            }
        }
        None
    }

    async fn attempt_source(&self, source: &dyn Source) -> Result<Vec<Item>> {
        let policy = source.policy();
        let mut last_error = None;

        for attempt in 0..policy.attempts {
            if attempt > 0 {
                let delay = policy.backoff_for(attempt - 1);
                debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    source.name(),
                    delay,
                    attempt + 1,
                    policy.attempts
                );
                tokio::time::sleep(delay).await;
            }

            let (error, retryable) = match timeout(policy.timeout, source.fetch(self.max_items)).await {
                Ok(Ok(items)) if !items.is_empty() => return Ok(items),
                // An empty page is usually a hiccup upstream.
                Ok(Ok(_)) => (Error::InvalidItem(format!("{} returned no items", source.name())), true),
                Ok(Err(e)) => {
                    let retryable = e.is_temporary();
                    (e, retryable)
                }
                Err(_) => (
                    Error::Timeout(format!("{} did not answer within {:?}", source.name(), policy.timeout)),
                    true,
                ),
            };

            debug!("Attempt {} against {} failed: {}", attempt + 1, source.name(), error);
            last_error = Some(error);
            if !retryable {
                debug!("Not retrying {}: the failure is permanent", source.name());
                break;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::InvalidState(format!("{} was never attempted", source.name()))))
    }
}

/// Fixed payload served when nothing else is available.
pub fn placeholder_items() -> Vec<Item> {
    vec![
        Item {
            id: 0,
            title: "You appear to be offline".to_string(),
            url: "https://news.ycombinator.com/".to_string(),
            author: "news-shelf".to_string(),
            score: 0,
            comment_count: 0,
            published_at: DateTime::<Utc>::UNIX_EPOCH,
        },
        Item {
            id: 1,
            title: "Stories will appear here once a connection is available".to_string(),
            url: "https://news.ycombinator.com/".to_string(),
            author: "news-shelf".to_string(),
            score: 0,
            comment_count: 0,
            published_at: DateTime::<Utc>::UNIX_EPOCH,
        },
    ]
}
