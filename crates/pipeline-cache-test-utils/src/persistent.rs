//! An in-memory persistent store that counts what happens to it.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use gpu_persistent_cache::{
    blob::Blob,
    caching::{CachingInterface, MemoryCache},
    persistent::PersistentCache,
};

/// A [`CachingInterface`] that keeps entries in memory and counts hits.
///
/// Can be switched off to behave like a platform that declines every store.
#[derive(Debug, Default)]
pub struct FakePersistentCache {
    /// The entries.
    memory: MemoryCache,
    /// Loads that found an entry.
    hits: AtomicUsize,
    /// Accepted stores.
    stores: AtomicUsize,
    /// Declines every store while set.
    read_only: AtomicBool,
}

impl FakePersistentCache {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wraps `this` in a [`PersistentCache`] for a device.
    #[must_use]
    pub fn persistent_cache(this: &Arc<Self>) -> PersistentCache {
        PersistentCache::new(Some(Arc::clone(this) as Arc<dyn CachingInterface>))
    }

    /// Returns the number of loads that found an entry.
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Returns the number of accepted stores.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// Returns the number of stored entries.
    pub fn entry_count(&self) -> usize {
        self.memory.len()
    }

    /// Makes the store decline (`true`) or accept (`false`) stores.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Removes every entry and resets the counters.
    pub fn clear(&self) {
        self.memory.clear();
        self.hits.store(0, Ordering::SeqCst);
        self.stores.store(0, Ordering::SeqCst);
    }
}

impl CachingInterface for FakePersistentCache {
    fn load_data(&self, key: &[u8]) -> Option<Blob> {
        let blob = self.memory.load_data(key);
        if blob.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        blob
    }

    fn store_data(&self, key: &[u8], value: &[u8]) -> bool {
        if self.read_only.load(Ordering::SeqCst) {
            log::debug!("fake persistent cache declined {} bytes", value.len());
            return false;
        }
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.memory.store_data(key, value)
    }
}
