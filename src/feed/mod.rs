pub mod fetcher;
pub mod parser;
pub mod pipeline;
pub mod refresher;
pub mod source;

#[cfg(test)]
pub(crate) mod test_support;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DISCUSSION_BASE_URL: &str = "https://news.ycombinator.com/item?id=";

/// A news item as delivered by the upstream source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub score: i64,
    pub comment_count: u32,
    pub published_at: DateTime<Utc>,
}

impl Item {
    pub fn discussion_url(&self) -> String {
        format!("{}{}", DISCUSSION_BASE_URL, self.id)
    }

    /// Host part of the link, for display next to the title.
    pub fn domain(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
    }

    pub fn to_text(&self) -> String {
        let mut text = self.title.clone();

        if let Some(domain) = self.domain() {
            text.push_str(&format!(" ({})", domain));
        }

        text.push_str(&format!(
            "\n    {} points by {} | {} comments | {}",
            self.score,
            self.author,
            self.comment_count,
            self.published_at.format("%Y-%m-%d %H:%M UTC")
        ));
        text.push_str(&format!("\n    {}", self.url));
        text
    }
}

/// Stable fingerprint of an item list, based on ids and order only.
pub fn digest(items: &[Item]) -> String {
    let mut hasher = blake3::Hasher::new();
    for item in items {
        hasher.update(&item.id.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_item(id: u64) -> Item {
        Item {
            id,
            title: format!("Story {}", id),
            url: format!("https://www.example.com/story/{}", id),
            author: "pg".to_string(),
            score: 42,
            comment_count: 7,
            published_at: Utc.with_ymd_and_hms(2024, 3, 16, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_domain_strips_www() {
        assert_eq!(sample_item(1).domain().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_to_text_contains_metadata() {
        let text = sample_item(8863).to_text();
        assert!(text.starts_with("Story 8863 (example.com)"));
        assert!(text.contains("42 points by pg"));
        assert!(text.contains("7 comments"));
    }

    #[test]
    fn test_digest_depends_on_ids_and_order() {
        let a = vec![sample_item(1), sample_item(2)];
        let b = vec![sample_item(2), sample_item(1)];
        let mut c = a.clone();
        c[0].score = 1000;

        assert_ne!(digest(&a), digest(&b));
        assert_eq!(digest(&a), digest(&c));
    }
}
