//! Saved items and their age-based expiry.
//!
//! Users keep items under one of two categories. Each category has its own
//! retention window; [`RetentionCleanupService`] deletes records that have
//! outlived theirs.

pub mod cleanup;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{RetentionSettings, MAX_RETENTION_DAYS};
use crate::error::{Error, Result};

pub use cleanup::{CleanupReport, CleanupState, RetentionCleanupService};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Read-later list, short-lived.
    Ephemeral,
    /// Saved items, long-lived.
    Durable,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Ephemeral, Category::Durable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ephemeral => "ephemeral",
            Category::Durable => "durable",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ephemeral" | "read-later" => Ok(Category::Ephemeral),
            "durable" | "saved" => Ok(Category::Durable),
            other => Err(Error::Invalid(format!("Unknown category '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRecord {
    pub owner_id: String,
    pub item_id: u64,
    pub category: Category,
    pub saved_at: DateTime<Utc>,
}

impl RetentionRecord {
    pub fn new(owner_id: &str, item_id: u64, category: Category, saved_at: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            item_id,
            category,
            saved_at,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            owner_id: self.owner_id.clone(),
            item_id: self.item_id,
            category: self.category,
        }
    }
}

/// Identity of a record: one per owner, item and category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub owner_id: String,
    pub item_id: u64,
    pub category: Category,
}

/// Delete every record of `category` saved strictly before `before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff {
    pub category: Category,
    pub before: DateTime<Utc>,
}

impl Cutoff {
    pub fn matches(&self, record: &RetentionRecord) -> bool {
        record.category == self.category && record.saved_at < self.before
    }
}

/// How far ahead of deletion a record counts as "expiring soon".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningWindows {
    pub ephemeral: Duration,
    pub durable: Duration,
}

impl WarningWindows {
    pub fn window(&self, category: Category) -> Duration {
        match category {
            Category::Ephemeral => self.ephemeral,
            Category::Durable => self.durable,
        }
    }
}

impl Default for WarningWindows {
    fn default() -> Self {
        Self {
            ephemeral: Duration::days(3),
            durable: Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    ephemeral: Duration,
    durable: Duration,
    warnings: WarningWindows,
}

impl RetentionPolicy {
    pub fn new(ephemeral: Duration, durable: Duration, warnings: WarningWindows) -> Result<Self> {
        for category in Category::ALL {
            let retention = match category {
                Category::Ephemeral => ephemeral,
                Category::Durable => durable,
            };
            let warning = warnings.window(category);

            if retention <= Duration::zero() {
                return Err(Error::Config(format!("{} retention window must be positive", category)));
            }
            if retention > Duration::days(MAX_RETENTION_DAYS) {
                return Err(Error::Config(format!(
                    "{} retention window must not exceed {} days",
                    category, MAX_RETENTION_DAYS
                )));
            }
            if warning <= Duration::zero() || warning >= retention {
                return Err(Error::Config(format!(
                    "{} warning window must be positive and shorter than its retention window",
                    category
                )));
            }
        }

        Ok(Self {
            ephemeral,
            durable,
            warnings,
        })
    }

    pub fn from_settings(settings: &RetentionSettings) -> Result<Self> {
        Self::new(
            days("ephemeral_days", settings.ephemeral_days)?,
            days("durable_days", settings.durable_days)?,
            WarningWindows {
                ephemeral: days("ephemeral_warning_days", settings.ephemeral_warning_days)?,
                durable: days("durable_warning_days", settings.durable_warning_days)?,
            },
        )
    }

    pub fn window(&self, category: Category) -> Duration {
        match category {
            Category::Ephemeral => self.ephemeral,
            Category::Durable => self.durable,
        }
    }

    pub fn warnings(&self) -> &WarningWindows {
        &self.warnings
    }

    pub fn cutoff(&self, category: Category, now: DateTime<Utc>) -> Cutoff {
        Cutoff {
            category,
            before: saturating_before(now, self.window(category)),
        }
    }

    pub fn cutoffs(&self, now: DateTime<Utc>) -> Vec<Cutoff> {
        Category::ALL.iter().map(|&c| self.cutoff(c, now)).collect()
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ephemeral: Duration::days(15),
            durable: Duration::days(365),
            warnings: WarningWindows::default(),
        }
    }
}

fn days(field: &str, days: i64) -> Result<Duration> {
    if !(0..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(Error::Config(format!(
            "{} must be between 0 and {}, got {}",
            field, MAX_RETENTION_DAYS, days
        )));
    }
    Duration::try_days(days).ok_or_else(|| Error::Config(format!("{} is out of range: {}", field, days)))
}

/// `now - by`, clamped to the earliest representable instant.
pub(crate) fn saturating_before(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Per-category counts with every category present.
pub fn zeroed_counts() -> BTreeMap<Category, usize> {
    Category::ALL.iter().map(|&c| (c, 0)).collect()
}
