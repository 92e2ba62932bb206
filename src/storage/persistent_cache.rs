use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feed::Item;
use crate::storage::cache::CacheEntry;
use crate::storage::traits::CacheBackend;

/// On-disk layout of the cache slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSlot {
    pub items: Vec<Item>,
    /// Fetch time, epoch milliseconds.
    pub timestamp: i64,
    pub version: String,
}

impl From<&CacheEntry> for PersistedSlot {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            items: entry.items.clone(),
            timestamp: entry.fetched_at.timestamp_millis(),
            version: entry.version.clone(),
        }
    }
}

impl TryFrom<PersistedSlot> for CacheEntry {
    type Error = Error;

    fn try_from(slot: PersistedSlot) -> Result<Self> {
        let fetched_at = DateTime::<Utc>::from_timestamp_millis(slot.timestamp)
            .ok_or_else(|| Error::Cache(format!("Cache timestamp {} out of range", slot.timestamp)))?;

        Ok(Self {
            items: slot.items,
            fetched_at,
            version: slot.version,
        })
    }
}

/// Cache slot kept in a single JSON file.
pub struct FileBackend {
    cache_file: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(cache_file: P) -> Result<Self> {
        let cache_file = cache_file.as_ref().to_path_buf();

        if let Some(dir) = cache_file.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    Error::Storage(format!("Failed to create cache directory '{}': {}", dir.display(), e))
                })?;
            }
        }

        let backend = Self { cache_file };
        backend.remove_temp_file();
        Ok(backend)
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_file
    }

    fn temp_path(&self) -> PathBuf {
        self.cache_file.with_extension("tmp")
    }

    // A crash between write and rename leaves the temp file behind.
    fn remove_temp_file(&self) {
        let temp_file = self.temp_path();
        if temp_file.exists() {
            let _ = fs::remove_file(&temp_file);
        }
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    async fn load(&self) -> Result<Option<CacheEntry>> {
        let content = match tokio::fs::read_to_string(&self.cache_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Cache file does not exist: {}", self.cache_file.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read cache file '{}': {}",
                    self.cache_file.display(),
                    e
                )))
            }
        };

        let slot: PersistedSlot = serde_json::from_str(&content)?;
        let entry = CacheEntry::try_from(slot)?;

        tracing::debug!(
            "Loaded cache slot: {} items fetched at {}",
            entry.items.len(),
            entry.fetched_at
        );

        Ok(Some(entry))
    }

    async fn store(&self, entry: &CacheEntry) -> Result<()> {
        let json_content = serde_json::to_string(&PersistedSlot::from(entry))?;

        // Write to a temporary file first, then rename over the slot.
        let temp_file = self.temp_path();
        tokio::fs::write(&temp_file, json_content).await.map_err(|e| {
            Error::Storage(format!("Failed to write cache to '{}': {}", temp_file.display(), e))
        })?;

        tokio::fs::rename(&temp_file, &self.cache_file).await.map_err(|e| {
            Error::Storage(format!(
                "Failed to rename cache file '{}' to '{}': {}",
                temp_file.display(),
                self.cache_file.display(),
                e
            ))
        })?;

        tracing::debug!("Saved cache: {} items to {}", entry.items.len(), self.cache_file.display());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.cache_file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove cache file '{}': {}",
                self.cache_file.display(),
                e
            ))),
        }
    }
}
