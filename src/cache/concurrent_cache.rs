//! Bounded get-or-compute cache
//!
//! Concurrent misses for the same key are coalesced: exactly one caller
//! runs the compute closure while the others block on the slot and
//! observe the computed value. The map lock is never held across a
//! compute, so unrelated keys do not serialize on each other.

use crate::error::Result;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub struct ConcurrentCache<K: Hash + Eq + Copy, V: Clone> {
    slots: Mutex<LruCache<K, Arc<OnceCell<V>>>>,
}

impl<K: Hash + Eq + Copy, V: Clone> ConcurrentCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached value for `key`, or the result of `compute`, which runs
    /// at most once per key however many callers race on it. A failed
    /// compute leaves no slot behind, so a later call can retry.
    ///
    /// Capacity eviction may drop a slot that is still being computed;
    /// its waiters hold the slot through the `Arc` and still observe
    /// the result, it just does not stay cached.
    pub fn get_or_put<F>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get(&key) {
                Arc::clone(slot)
            } else {
                let slot = Arc::new(OnceCell::new());
                slots.put(key, Arc::clone(&slot));
                slot
            }
        };

        match slot.get_or_try_init(compute) {
            Ok(value) => Ok(value.clone()),
            Err(e) => {
                let mut slots = self.slots.lock();
                let empty = slots
                    .peek(&key)
                    .is_some_and(|s| Arc::ptr_eq(s, &slot) && s.get().is_none());
                if empty {
                    slots.pop(&key);
                }
                Err(e)
            }
        }
    }

    /// Drop the cached value for `key`, if any.
    pub fn remove(&self, key: K) {
        self.slots.lock().pop(&key);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
