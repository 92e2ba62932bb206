use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::retention::{zeroed_counts, Category, Cutoff, RecordKey, RetentionRecord};

/// Persistence for saved items.
///
/// Every mutation is applied as a whole or not at all; `purge` in particular
/// removes all matching records across categories in one step.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fails with `AlreadyExists` if the owner already keeps the item in
    /// that category.
    async fn insert(&self, record: RetentionRecord) -> Result<()>;

    async fn remove(&self, key: &RecordKey) -> Result<bool>;

    /// Move a record to another category. The old record is deleted and a
    /// new one created with `saved_at = now`.
    async fn relocate(&self, key: &RecordKey, to: Category, now: DateTime<Utc>) -> Result<RetentionRecord>;

    /// Delete every record matched by any cutoff. Returns counts for every
    /// category, including zeroes.
    async fn purge(&self, cutoffs: &[Cutoff]) -> Result<BTreeMap<Category, usize>>;

    /// Records of `category` with `from <= saved_at < until`.
    async fn count_saved_between(
        &self,
        category: Category,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<usize>;

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<RetentionRecord>>;

    async fn len(&self) -> Result<usize>;
}

/// The record set and the operations both stores share.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RecordSet {
    records: BTreeMap<RecordKey, RetentionRecord>,
}

impl RecordSet {
    fn from_records(records: Vec<RetentionRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }

    fn to_records(&self) -> Vec<RetentionRecord> {
        self.records.values().cloned().collect()
    }

    fn insert(&mut self, record: RetentionRecord) -> Result<()> {
        let key = record.key();
        if self.records.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "Item {} is already {} for {}",
                key.item_id, key.category, key.owner_id
            )));
        }
        self.records.insert(key, record);
        Ok(())
    }

    fn remove(&mut self, key: &RecordKey) -> bool {
        self.records.remove(key).is_some()
    }

    fn relocate(&mut self, key: &RecordKey, to: Category, now: DateTime<Utc>) -> Result<RetentionRecord> {
        if !self.records.contains_key(key) {
            return Err(Error::NotFound(format!(
                "Item {} is not {} for {}",
                key.item_id, key.category, key.owner_id
            )));
        }

        let moved = RetentionRecord::new(&key.owner_id, key.item_id, to, now);
        if key.category != to && self.records.contains_key(&moved.key()) {
            return Err(Error::AlreadyExists(format!(
                "Item {} is already {} for {}",
                key.item_id, to, key.owner_id
            )));
        }

        self.records.remove(key);
        self.records.insert(moved.key(), moved.clone());
        Ok(moved)
    }

    fn purge(&mut self, cutoffs: &[Cutoff]) -> BTreeMap<Category, usize> {
        let mut deleted = zeroed_counts();
        self.records.retain(|_, record| match cutoffs.iter().find(|c| c.matches(record)) {
            Some(cutoff) => {
                *deleted.entry(cutoff.category).or_default() += 1;
                false
            }
            None => true,
        });
        deleted
    }

    fn count_saved_between(&self, category: Category, from: DateTime<Utc>, until: DateTime<Utc>) -> usize {
        self.records
            .values()
            .filter(|r| r.category == category && r.saved_at >= from && r.saved_at < until)
            .count()
    }

    fn list(&self, owner_id: Option<&str>) -> Vec<RetentionRecord> {
        self.records
            .values()
            .filter(|r| owner_id.map_or(true, |owner| r.owner_id == owner))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    set: RwLock<RecordSet>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<RetentionRecord>) -> Self {
        Self {
            set: RwLock::new(RecordSet::from_records(records)),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: RetentionRecord) -> Result<()> {
        self.set.write().insert(record)
    }

    async fn remove(&self, key: &RecordKey) -> Result<bool> {
        Ok(self.set.write().remove(key))
    }

    async fn relocate(&self, key: &RecordKey, to: Category, now: DateTime<Utc>) -> Result<RetentionRecord> {
        self.set.write().relocate(key, to, now)
    }

    async fn purge(&self, cutoffs: &[Cutoff]) -> Result<BTreeMap<Category, usize>> {
        Ok(self.set.write().purge(cutoffs))
    }

    async fn count_saved_between(
        &self,
        category: Category,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self.set.read().count_saved_between(category, from, until))
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<RetentionRecord>> {
        Ok(self.set.read().list(owner_id))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.set.read().records.len())
    }
}

const RECORDS_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RecordsFile {
    version: u32,
    records: Vec<RetentionRecord>,
}

/// Records kept in one JSON file.
///
/// Mutations rewrite the whole file through a temp file and rename, so a
/// failed write leaves the previous contents in place.
pub struct FileRecordStore {
    path: PathBuf,
    // Serialises read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileRecordStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    Error::Storage(format!("Failed to create records directory '{}': {}", dir.display(), e))
                })?;
            }
        }

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<RecordSet> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RecordSet::default()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read records file '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let file: RecordsFile = serde_json::from_str(&content)?;

        if file.version != RECORDS_FILE_VERSION {
            return Err(Error::Storage(format!(
                "Unsupported records file version {} in '{}'",
                file.version,
                self.path.display()
            )));
        }

        Ok(RecordSet::from_records(file.records))
    }

    async fn write(&self, set: &RecordSet) -> Result<()> {
        let file = RecordsFile {
            version: RECORDS_FILE_VERSION,
            records: set.to_records(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let temp_file = self.path.with_extension("tmp");
        tokio::fs::write(&temp_file, content).await.map_err(|e| {
            Error::Storage(format!("Failed to write records to '{}': {}", temp_file.display(), e))
        })?;
        tokio::fs::rename(&temp_file, &self.path).await.map_err(|e| {
            Error::Storage(format!(
                "Failed to rename records file '{}' to '{}': {}",
                temp_file.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!("Saved {} records to {}", set.records.len(), self.path.display());
        Ok(())
    }

    /// Apply `change` to a copy of the stored set and write it back.
    async fn update<T>(&self, change: impl FnOnce(&mut RecordSet) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut set = self.read().await?;
        let out = change(&mut set)?;
        self.write(&set).await?;
        Ok(out)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn insert(&self, record: RetentionRecord) -> Result<()> {
        self.update(|set| set.insert(record)).await
    }

    async fn remove(&self, key: &RecordKey) -> Result<bool> {
        self.update(|set| Ok(set.remove(key))).await
    }

    async fn relocate(&self, key: &RecordKey, to: Category, now: DateTime<Utc>) -> Result<RetentionRecord> {
        self.update(|set| set.relocate(key, to, now)).await
    }

    async fn purge(&self, cutoffs: &[Cutoff]) -> Result<BTreeMap<Category, usize>> {
        self.update(|set| Ok(set.purge(cutoffs))).await
    }

    async fn count_saved_between(
        &self,
        category: Category,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<usize> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.count_saved_between(category, from, until))
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<RetentionRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.list(owner_id))
    }

    async fn len(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.records.len())
    }
}
