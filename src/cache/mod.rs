//! Caches for the hot read paths

mod concurrent_cache;

pub use concurrent_cache::ConcurrentCache;

use crate::dirent::Dirent;
use crate::types::EntryIndex;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Bounded LRU of parsed dirents with hit/miss accounting. The owner
/// wraps it in a mutex; lookups refresh the LRU order.
pub struct DirentCache {
    map: LruCache<EntryIndex, Arc<Dirent>>,
    hits: u64,
    misses: u64,
    fills: u64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fills: u64,
    pub len: usize,
    pub capacity: usize,
}

impl DirentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            map: LruCache::new(capacity),
            hits: 0,
            misses: 0,
            fills: 0,
        }
    }

    pub fn get(&mut self, index: EntryIndex) -> Option<Arc<Dirent>> {
        match self.map.get(&index) {
            Some(dirent) => {
                self.hits += 1;
                Some(Arc::clone(dirent))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert, evicting the least-recently used entry at capacity.
    pub fn put(&mut self, index: EntryIndex, dirent: Arc<Dirent>) {
        self.fills += 1;
        self.map.put(index, dirent);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            fills: self.fills,
            len: self.map.len(),
            capacity: self.map.cap().get(),
        }
    }
}
