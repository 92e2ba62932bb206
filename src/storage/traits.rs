use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::cache::CacheEntry;

/// Durable home of the single cache slot.
///
/// Implementations only move bytes; versioning, freshness and write ordering
/// are handled by [`crate::storage::CacheStore`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read the slot. `Ok(None)` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<CacheEntry>>;

    /// Replace the slot with `entry`.
    async fn store(&self, entry: &CacheEntry) -> Result<()>;

    /// Empty the slot. Removing an empty slot is not an error.
    async fn remove(&self) -> Result<()>;
}

/// Memory-only backend for tests and short-lived processes.
#[derive(Default)]
pub struct MemoryBackend {
    slot: RwLock<Option<CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(entry: CacheEntry) -> Self {
        Self {
            slot: RwLock::new(Some(entry)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<CacheEntry>> {
        Ok(self.slot.read().clone())
    }

    async fn store(&self, entry: &CacheEntry) -> Result<()> {
        *self.slot.write() = Some(entry.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        *self.slot.write() = None;
        Ok(())
    }
}
