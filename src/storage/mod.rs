pub mod cache;
pub mod persistent_cache;
pub mod traits;

pub use cache::{CacheEntry, CachePolicy, CacheStats, CacheStore, WriteTicket, CACHE_VERSION};
pub use persistent_cache::{FileBackend, PersistedSlot};
pub use traits::{CacheBackend, MemoryBackend};
