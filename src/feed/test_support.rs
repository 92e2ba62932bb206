//! Scripted sources for pipeline and refresher tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::feed::source::{AttemptPolicy, Source};
use crate::feed::Item;

#[derive(Debug, Clone)]
pub enum Outcome {
    Items(Vec<Item>),
    Fail,
    /// Answers with a payload that cannot be decoded.
    Malformed,
    Hang,
}

pub struct ScriptedSource {
    name: String,
    policy: AttemptPolicy,
    script: Mutex<VecDeque<Outcome>>,
    /// Used once the script runs out.
    default: Outcome,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(name: &str, default: Outcome) -> Self {
        Self {
            name: name.to_string(),
            policy: AttemptPolicy::single(Duration::from_secs(5)),
            script: Mutex::new(VecDeque::new()),
            default,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, Outcome::Fail)
    }

    pub fn serving(name: &str, items: Vec<Item>) -> Self {
        Self::new(name, Outcome::Items(items))
    }

    pub fn with_policy(mut self, policy: AttemptPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then(self, outcome: Outcome) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> &AttemptPolicy {
        &self.policy
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Item>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().pop_front().unwrap_or_else(|| self.default.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match outcome {
            Outcome::Items(mut items) => {
                items.truncate(limit);
                Ok(items)
            }
            Outcome::Fail => Err(Error::HttpError(format!("{} is down", self.name))),
            Outcome::Malformed => Err(Error::InvalidItem(format!("{} sent garbage", self.name))),
            Outcome::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

pub fn items(ids: &[u64]) -> Vec<Item> {
    ids.iter()
        .map(|&id| Item {
            id,
            title: format!("Story {}", id),
            url: format!("https://example.com/{}", id),
            author: "tester".to_string(),
            score: id as i64,
            comment_count: 0,
            published_at: Utc.with_ymd_and_hms(2024, 3, 16, 8, 0, 0).unwrap(),
        })
        .collect()
}
