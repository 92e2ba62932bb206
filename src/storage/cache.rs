use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MAX_CACHE_MINUTES;
use crate::error::{Error, Result};
use crate::feed::Item;
use crate::storage::traits::{CacheBackend, MemoryBackend};

/// Schema version written with every entry. Slots carrying another version
/// are ignored.
pub const CACHE_VERSION: &str = "1";

/// One cached content snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub items: Vec<Item>,
    pub fetched_at: DateTime<Utc>,
    pub version: String,
}

impl CacheEntry {
    pub fn new(items: Vec<Item>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            items,
            fetched_at,
            version: CACHE_VERSION.to_string(),
        }
    }
}

/// Freshness thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Entries younger than this are served without touching the network.
    pub ttl: Duration,
    /// Entries older than this are still served on total failure, but flagged.
    pub stale_after: Duration,
}

impl CachePolicy {
    pub fn new(ttl: Duration, stale_after: Duration) -> Result<Self> {
        if ttl <= Duration::zero() {
            return Err(Error::Config("Cache TTL must be positive".to_string()));
        }
        if stale_after < ttl {
            return Err(Error::Config("Stale threshold must not be shorter than the TTL".to_string()));
        }
        if stale_after > Duration::minutes(MAX_CACHE_MINUTES) {
            return Err(Error::Config(format!(
                "Stale threshold must not exceed {} minutes",
                MAX_CACHE_MINUTES
            )));
        }
        Ok(Self { ttl, stale_after })
    }

    pub fn age(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Duration {
        now - entry.fetched_at
    }

    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.age(entry, now) < self.ttl
    }

    pub fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.age(entry, now) > self.stale_after
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(30),
            stale_after: Duration::hours(2),
        }
    }
}

/// Issued when a refresh starts; a write is only accepted if no later
/// ticket has been committed and no clear has happened since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WriteTicket(u64);

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub reads: u64,
    pub writes: u64,
    pub rejected_writes: u64,
    pub clears: u64,
    pub backend_failures: u64,
}

struct Slot {
    entry: Option<CacheEntry>,
    hydrated: bool,
    /// Highest ticket committed or invalidated by a clear.
    floor: u64,
}

/// Holder of the single cached snapshot.
///
/// The backend is read lazily on first access and mirrored in memory after
/// that. Backend failures never surface: a failed read looks like an empty
/// cache, a failed write keeps the in-memory copy.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    policy: CachePolicy,
    slot: tokio::sync::Mutex<Slot>,
    tickets: AtomicU64,
    stats: Mutex<CacheStats>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: CachePolicy) -> Self {
        Self {
            backend,
            policy,
            slot: tokio::sync::Mutex::new(Slot {
                entry: None,
                hydrated: false,
                floor: 0,
            }),
            tickets: AtomicU64::new(0),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn in_memory(policy: CachePolicy) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), policy)
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub async fn get(&self) -> Option<CacheEntry> {
        let mut slot = self.slot.lock().await;
        self.stats.lock().reads += 1;

        if !slot.hydrated {
            match self.backend.load().await {
                Ok(Some(entry)) if entry.version != CACHE_VERSION => {
                    info!(
                        "Ignoring cached entry with version {} (expected {})",
                        entry.version, CACHE_VERSION
                    );
                    slot.entry = None;
                    slot.hydrated = true;
                }
                Ok(entry) => {
                    slot.entry = entry;
                    slot.hydrated = true;
                }
                Err(e) => {
                    // Stay unhydrated so the next read tries the backend again.
                    warn!("Cache read failed, treating as empty: {}", e);
                    self.stats.lock().backend_failures += 1;
                    return None;
                }
            }
        }

        slot.entry.clone()
    }

    /// Store `items` as the new snapshot, unconditionally.
    pub async fn set(&self, items: Vec<Item>, now: DateTime<Utc>) -> bool {
        let ticket = self.begin_write();
        self.commit(ticket, items, now).await
    }

    pub fn begin_write(&self) -> WriteTicket {
        WriteTicket(self.tickets.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Replace the snapshot if `ticket` is still current. Returns whether the
    /// write was accepted.
    pub async fn commit(&self, ticket: WriteTicket, items: Vec<Item>, now: DateTime<Utc>) -> bool {
        let mut slot = self.slot.lock().await;

        if ticket.0 <= slot.floor {
            debug!(
                "Rejecting cache write {} (superseded by {})",
                ticket.0, slot.floor
            );
            self.stats.lock().rejected_writes += 1;
            return false;
        }

        let entry = CacheEntry::new(items, now);
        if let Err(e) = self.backend.store(&entry).await {
            warn!("Cache write failed, keeping in-memory copy only: {}", e);
            self.stats.lock().backend_failures += 1;
        }

        slot.entry = Some(entry);
        slot.hydrated = true;
        slot.floor = ticket.0;
        self.stats.lock().writes += 1;
        true
    }

    /// Drop the snapshot. Writes from tickets issued before the clear are
    /// rejected.
    pub async fn clear(&self) {
        let mut slot = self.slot.lock().await;

        slot.floor = slot.floor.max(self.tickets.load(Ordering::SeqCst));
        slot.entry = None;
        slot.hydrated = true;

        if let Err(e) = self.backend.remove().await {
            warn!("Failed to remove cached slot: {}", e);
            self.stats.lock().backend_failures += 1;
        }

        self.stats.lock().clears += 1;
        debug!("Cache cleared");
    }

    pub fn age(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Duration {
        self.policy.age(entry, now)
    }

    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.policy.is_fresh(entry, now)
    }

    pub fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.policy.is_stale(entry, now)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn create_test_item(id: u64) -> Item {
        Item {
            id,
            title: format!("Item {}", id),
            url: format!("https://example.com/{}", id),
            author: "tester".to_string(),
            score: 10,
            comment_count: 2,
            published_at: Utc.with_ymd_and_hms(2024, 3, 16, 8, 0, 0).unwrap(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 16, 12, 0, 0).unwrap()
    }

    struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        async fn load(&self) -> Result<Option<CacheEntry>> {
            Err(Error::Storage("disk on fire".to_string()))
        }

        async fn store(&self, _entry: &CacheEntry) -> Result<()> {
            Err(Error::Storage("disk on fire".to_string()))
        }

        async fn remove(&self) -> Result<()> {
            Err(Error::Storage("disk on fire".to_string()))
        }
    }

    proptest! {
        #[test]
        fn prop_fresh_iff_younger_than_ttl(offset_secs in -86_400i64..86_400 * 3) {
            let policy = CachePolicy::default();
            let entry = CacheEntry::new(vec![], t0());
            let now = t0() + Duration::seconds(offset_secs);

            prop_assert_eq!(policy.is_fresh(&entry, now), now - t0() < policy.ttl);
            prop_assert_eq!(policy.is_stale(&entry, now), now - t0() > policy.stale_after);
        }
    }

    #[test]
    fn test_freshness_boundaries() {
        let policy = CachePolicy::default();
        let entry = CacheEntry::new(vec![], t0());

        assert!(policy.is_fresh(&entry, t0() + Duration::minutes(29)));
        assert!(!policy.is_fresh(&entry, t0() + Duration::minutes(30)));
        assert!(!policy.is_stale(&entry, t0() + Duration::minutes(45)));
        assert!(policy.is_stale(&entry, t0() + Duration::minutes(121)));
        assert_eq!(policy.age(&entry, t0() + Duration::minutes(45)), Duration::minutes(45));
    }

    #[test]
    fn test_policy_validation() {
        assert!(CachePolicy::new(Duration::zero(), Duration::hours(1)).is_err());
        assert!(CachePolicy::new(Duration::hours(2), Duration::hours(1)).is_err());
        assert!(CachePolicy::new(Duration::minutes(30), Duration::hours(2)).is_ok());
        assert!(CachePolicy::new(Duration::minutes(30), Duration::days(366)).is_err());
    }

    #[tokio::test]
    async fn test_set_get_clear() {
        let store = CacheStore::in_memory(CachePolicy::default());
        assert!(store.get().await.is_none());

        assert!(store.set(vec![create_test_item(1)], t0()).await);
        let entry = store.get().await.unwrap();
        assert_eq!(entry.items.len(), 1);
        assert_eq!(entry.fetched_at, t0());
        assert_eq!(entry.version, CACHE_VERSION);

        // Full replacement, no merge.
        store.set(vec![create_test_item(2), create_test_item(3)], t0()).await;
        let ids: Vec<u64> = store.get().await.unwrap().items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 3]);

        store.clear().await;
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn test_older_ticket_cannot_overwrite_newer() {
        let store = CacheStore::in_memory(CachePolicy::default());

        let slow = store.begin_write();
        let fast = store.begin_write();

        assert!(store.commit(fast, vec![create_test_item(2)], t0() + Duration::seconds(5)).await);
        assert!(!store.commit(slow, vec![create_test_item(1)], t0() + Duration::seconds(9)).await);

        let entry = store.get().await.unwrap();
        assert_eq!(entry.items[0].id, 2);
        assert_eq!(store.stats().rejected_writes, 1);
    }

    #[tokio::test]
    async fn test_clear_invalidates_in_flight_tickets() {
        let store = CacheStore::in_memory(CachePolicy::default());

        let in_flight = store.begin_write();
        store.clear().await;
        assert!(!store.commit(in_flight, vec![create_test_item(1)], t0()).await);
        assert!(store.get().await.is_none());

        let after = store.begin_write();
        assert!(store.commit(after, vec![create_test_item(2)], t0()).await);
        assert!(store.get().await.is_some());
    }

    #[tokio::test]
    async fn test_hydrates_from_backend_once() {
        let backend = Arc::new(MemoryBackend::with_entry(CacheEntry::new(vec![create_test_item(9)], t0())));
        let store = CacheStore::new(backend.clone(), CachePolicy::default());

        assert_eq!(store.get().await.unwrap().items[0].id, 9);

        // Later backend changes are not re-read; the store owns the slot.
        backend.remove().await.unwrap();
        assert!(store.get().await.is_some());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_ignored() {
        let mut old = CacheEntry::new(vec![create_test_item(1)], t0());
        old.version = "0".to_string();
        let store = CacheStore::new(Arc::new(MemoryBackend::with_entry(old)), CachePolicy::default());

        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_reads_as_absent() {
        let store = CacheStore::new(Arc::new(FailingBackend), CachePolicy::default());
        assert!(store.get().await.is_none());

        // Writes still land in memory.
        assert!(store.set(vec![create_test_item(1)], t0()).await);
        assert_eq!(store.get().await.unwrap().items.len(), 1);
        assert!(store.stats().backend_failures >= 2);

        store.clear().await;
        assert!(store.get().await.is_none());
    }
}
