//! Per-device façade over a [`CachingInterface`].

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use core::fmt;
use std::sync::Arc;

use crate::{
    blob::Blob,
    caching::{CachingInterface, DiskCache, DiskCacheError},
    config::CacheConfig,
    key::PersistentCacheKey,
};

/// Callback handed to the creator of [`PersistentCache::get_or_create`]
/// to store freshly created bytes under the requested key.
///
/// Returns whether the bytes were stored.
pub type DoCache<'cache> = dyn FnMut(&[u8]) -> bool + 'cache;

/// Load/store access to the embedding application's persistent store.
///
/// A cache without a backing [`CachingInterface`] is valid: every load misses
/// and every store is a no-op. Cloning is cheap and shares the interface.
#[derive(Clone, Default)]
pub struct PersistentCache {
    /// The backing store, if the platform provides one.
    interface: Option<Arc<dyn CachingInterface>>,
}

impl PersistentCache {
    /// Creates a cache backed by `interface`, or a disabled cache for [`None`].
    #[inline]
    #[must_use]
    pub fn new(interface: Option<Arc<dyn CachingInterface>>) -> Self {
        Self { interface }
    }

    /// Creates a cache without backing store.
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates a cache as described by `config`: a [`DiskCache`] in the
    /// configured (or default) directory, or a disabled cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the disk cache cannot be opened.
    #[inline]
    pub fn from_config(config: &CacheConfig) -> Result<Self, DiskCacheError> {
        if !config.persistent {
            log::debug!("persistent caching is disabled by configuration");
            return Ok(Self::disabled());
        }
        let disk = match &config.cache_dir {
            Some(dir) => DiskCache::new(dir)?,
            None => DiskCache::in_default_dir()?,
        };
        Ok(Self::new(Some(Arc::new(disk))))
    }

    /// Returns `true` if there is a backing store.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.interface.is_some()
    }

    /// Loads the bytes stored under `key`.
    ///
    /// Returns [`None`] on a miss or if there is no backing store.
    #[inline]
    #[must_use]
    pub fn load_data(&self, key: &PersistentCacheKey) -> Option<Blob> {
        let interface = self.interface.as_ref()?;
        let blob = interface.load_data(key.as_bytes());
        log::trace!(
            "persistent cache {} for key of {} bytes",
            if blob.is_some() { "hit" } else { "miss" },
            key.len()
        );
        blob
    }

    /// Stores `value` under `key`.
    ///
    /// Does nothing without a backing store. Storing empty data is a
    /// programming error.
    #[inline]
    pub fn store_data(&self, key: &PersistentCacheKey, value: &[u8]) -> bool {
        let Some(interface) = self.interface.as_ref() else {
            return false;
        };
        debug_assert!(!value.is_empty(), "storing empty data in the persistent cache");
        if value.is_empty() {
            return false;
        }
        log::debug!(
            "storing {} bytes in the persistent cache for key of {} bytes",
            value.len(),
            key.len()
        );
        interface.store_data(key.as_bytes(), value)
    }

    /// Returns the size of the data stored under `key`, zero on a miss.
    #[inline]
    #[must_use]
    pub fn data_size(&self, key: &PersistentCacheKey) -> usize {
        self.load_data(key).map_or(0, |blob| blob.len())
    }

    /// Loads the data under `key`, or creates it.
    ///
    /// On a hit the stored bytes are returned and `create_fn` is not called.
    /// On a miss `create_fn` runs with a [`DoCache`] callback that stores
    /// bytes under `key`. Once it succeeds, the bytes last accepted by the
    /// store are returned as the canonical value, without querying the store
    /// again.
    ///
    /// The result is [`None`] if there is no backing store, and an empty blob
    /// if the creator chose not to cache anything or the store declined it.
    /// In both cases the caller must not assume the created value persists.
    ///
    /// # Errors
    ///
    /// Returns the error of `create_fn` unchanged.
    #[inline]
    pub fn get_or_create<E, F>(
        &self,
        key: &PersistentCacheKey,
        create_fn: F,
    ) -> Result<Option<Blob>, E>
    where
        F: FnOnce(&mut DoCache<'_>) -> Result<(), E>,
    {
        if let Some(blob) = self.load_data(key) {
            if !blob.is_empty() {
                return Ok(Some(blob));
            }
        }

        let mut stored = None;
        let mut do_cache = |value: &[u8]| {
            let accepted = self.store_data(key, value);
            if accepted {
                stored = Some(Blob::new(value));
            }
            accepted
        };
        create_fn(&mut do_cache)?;

        if !self.is_enabled() {
            return Ok(None);
        }
        Ok(Some(stored.unwrap_or_default()))
    }
}

impl fmt::Debug for PersistentCache {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentCache")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
