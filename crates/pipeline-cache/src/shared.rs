//! Pipeline caches shared by all devices on one adapter.
//!
//! Devices that start from the same persisted library data get the same
//! [`PipelineCache`], so a pipeline built on one device is a library hit on
//! every other. The registry holds weak handles only: a cache lives as long as
//! some device uses it and removes itself from the registry when dropped.

use core::{convert::Infallible, fmt};
use std::sync::{Arc, Weak};

use gpu_persistent_cache::{
    config::CacheConfig,
    fingerprint::{FingerprintKey, RecordedObject as _},
    persistent::PersistentCache,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{
    backend::PipelineBackend,
    error::PipelineCacheError,
    pipeline_cache::{PipelineCache, PipelineCacheBlueprint},
};

/// A registered cache.
struct Entry<B: PipelineBackend> {
    /// [`PipelineCache::id`] of the cache.
    id: u64,
    /// The cache, dead once every device dropped it.
    cache: Weak<PipelineCache<B>>,
}

/// Registered caches by the fingerprint of their initial data.
pub(crate) struct Registry<B: PipelineBackend> {
    /// Lookup, insertion and removal all happen under this lock.
    entries: Mutex<FxHashMap<FingerprintKey, Entry<B>>>,
}

impl<B: PipelineBackend> Registry<B> {
    /// Removes the entry of a dropped cache.
    ///
    /// An entry already taken over by a newer cache with the same fingerprint
    /// is left alone.
    pub(crate) fn remove_pipeline_cache(&self, fingerprint: FingerprintKey, id: u64) {
        let mut entries = self.entries.lock();
        match entries.get(&fingerprint) {
            Some(entry) if entry.id == id => {
                debug_assert_eq!(
                    entry.cache.strong_count(),
                    0,
                    "removing a pipeline cache that is still in use"
                );
                entries.remove(&fingerprint);
                log::debug!("pipeline cache {id} removed from registry");
            }
            Some(_) | None => {
                log::trace!("pipeline cache {id} was already replaced in the registry");
            }
        }
    }

    /// Removes the entry of a cache that is still alive but stops sharing.
    pub(crate) fn detach(&self, fingerprint: FingerprintKey, id: u64) {
        let mut entries = self.entries.lock();
        if entries.get(&fingerprint).is_some_and(|entry| entry.id == id) {
            entries.remove(&fingerprint);
        }
    }
}

/// Adapter-scoped registry of shareable [`PipelineCache`]s.
pub struct SharedPipelineCaches<B: PipelineBackend> {
    /// The native API of the adapter.
    backend: Arc<B>,
    /// Settings applied to every cache.
    config: CacheConfig,
    /// The live caches.
    registry: Arc<Registry<B>>,
}

impl<B: PipelineBackend> SharedPipelineCaches<B> {
    /// Creates an empty registry for the adapter behind `backend`.
    #[inline]
    pub fn new(backend: Arc<B>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            registry: Arc::new(Registry {
                entries: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Returns the pipeline cache a device using `persistent` should use.
    ///
    /// * Without pipeline library support the cache is a private pass-through.
    /// * Otherwise the library data persisted for this adapter is looked up and
    ///   fingerprinted. A live cache created from equal data is shared.
    /// * Else a new cache is created and hydrated. It is registered for sharing
    ///   when there is a persistent cache, and disconnected when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if a new native library cannot be created.
    #[inline]
    pub fn get_or_create(
        &self,
        persistent: &PersistentCache,
    ) -> Result<Arc<PipelineCache<B>>, PipelineCacheError<B::Error>> {
        if self.config.disable_pipeline_library || !self.backend.supports_pipeline_library() {
            log::debug!("pipeline libraries are unavailable, using a pass-through pipeline cache");
            return Ok(Arc::new(PipelineCache::passthrough(
                Arc::clone(&self.backend),
                persistent.clone(),
            )));
        }

        let cache_key = self.backend.pipeline_cache_key();
        let pipeline_cache_data = match persistent
            .get_or_create(&cache_key, |_do_cache| Ok::<_, Infallible>(()))
        {
            Ok(data) => data,
            Err(never) => match never {},
        };
        let fingerprint =
            PipelineCacheBlueprint::new(pipeline_cache_data.as_ref()).fingerprint_key();

        let mut entries = self.registry.entries.lock();
        if let Some(cache) = entries
            .get(&fingerprint)
            .and_then(|entry| entry.cache.upgrade())
        {
            log::debug!("sharing pipeline cache {} with fingerprint {fingerprint}", cache.id());
            return Ok(cache);
        }

        let shareable = pipeline_cache_data.is_some();
        let cache = Arc::new(PipelineCache::with_initial_data(
            Arc::clone(&self.backend),
            persistent.clone(),
            pipeline_cache_data,
        ));
        cache.initialize()?;

        if shareable {
            entries.insert(
                fingerprint,
                Entry {
                    id: cache.id(),
                    cache: Arc::downgrade(&cache),
                },
            );
            cache.attach(Arc::downgrade(&self.registry));
            log::debug!("registered pipeline cache {} with fingerprint {fingerprint}", cache.id());
        } else {
            cache.disconnect_from_cache();
        }
        Ok(cache)
    }

    /// Returns the number of registered caches that are still in use.
    #[inline]
    pub fn len(&self) -> usize {
        self.registry
            .entries
            .lock()
            .values()
            .filter(|entry| entry.cache.strong_count() > 0)
            .count()
    }

    /// Returns `true` if no registered cache is in use.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the backend of the adapter.
    #[inline]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: PipelineBackend> fmt::Debug for SharedPipelineCaches<B> {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPipelineCaches")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use gpu_persistent_cache::{
        caching::{CachingInterface, MemoryCache},
        key::PersistentCacheKey,
    };

    use super::*;
    use crate::{
        backend::{CompiledPipeline, DescriptorOf, PipelineDescriptor, StoreStatus},
        descriptor::DescriptorKey,
        pipeline_cache::PipelineCacheState,
    };

    /// Libraries are sorted pipeline lists serialized as one byte each.
    struct ByteBackend {
        supported: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("byte backend failure")]
    struct ByteError;

    impl PipelineBackend for ByteBackend {
        type Library = Vec<u8>;
        type Pipeline = u8;
        type GraphicsDesc = u8;
        type ComputeDesc = u8;
        type Error = ByteError;

        fn supports_pipeline_library(&self) -> bool {
            self.supported
        }

        fn pipeline_cache_key(&self) -> PersistentCacheKey {
            PersistentCacheKey::builder().hex(0xb17e_u32).build()
        }

        fn create_library(&self, data: &[u8]) -> Result<Vec<u8>, ByteError> {
            Ok(data.to_vec())
        }

        fn load_pipeline(
            &self,
            library: &Vec<u8>,
            _name: &str,
            descriptor: DescriptorOf<'_, Self>,
        ) -> Result<Option<u8>, ByteError> {
            let (PipelineDescriptor::Compute(value) | PipelineDescriptor::Graphics(value)) =
                descriptor;
            Ok(library.contains(value).then_some(*value))
        }

        fn create_pipeline(
            &self,
            _library: Option<&Vec<u8>>,
            descriptor: DescriptorOf<'_, Self>,
        ) -> Result<CompiledPipeline<u8>, ByteError> {
            let (PipelineDescriptor::Compute(value) | PipelineDescriptor::Graphics(value)) =
                descriptor;
            Ok(CompiledPipeline::compiled(*value))
        }

        fn store_pipeline(
            &self,
            library: &mut Vec<u8>,
            _name: &str,
            pipeline: &u8,
        ) -> Result<StoreStatus, ByteError> {
            if library.contains(pipeline) {
                return Ok(StoreStatus::AlreadyPresent);
            }
            library.push(*pipeline);
            library.sort_unstable();
            Ok(StoreStatus::Stored)
        }

        fn serialize_library(&self, library: &Vec<u8>) -> Result<Vec<u8>, ByteError> {
            Ok(library.clone())
        }
    }

    fn shared(supported: bool) -> SharedPipelineCaches<ByteBackend> {
        SharedPipelineCaches::new(Arc::new(ByteBackend { supported }), CacheConfig::default())
    }

    fn memory_backed() -> (PersistentCache, Arc<MemoryCache>) {
        let memory = Arc::new(MemoryCache::new());
        let cache = PersistentCache::new(Some(Arc::clone(&memory) as Arc<dyn CachingInterface>));
        (cache, memory)
    }

    fn create(cache: &PipelineCache<ByteBackend>, value: &u8) -> bool {
        let key = DescriptorKey::from(FingerprintKey::from_raw(u64::from(*value)));
        cache
            .get_or_create(PipelineDescriptor::Compute(value), key, true)
            .unwrap()
            .from_library
    }

    #[test_log::test]
    fn devices_share_one_cache() {
        let shared = shared(true);
        let (persistent, _memory) = memory_backed();
        let device_a = shared.get_or_create(&persistent).unwrap();
        let device_b = shared.get_or_create(&persistent).unwrap();
        assert!(Arc::ptr_eq(&device_a, &device_b));
        assert_eq!(shared.len(), 1);

        assert!(!create(&device_a, &5));
        assert!(create(&device_b, &5));
        assert_eq!(device_b.hit_count(), 1);
    }

    #[test_log::test]
    fn dropped_cache_leaves_the_registry() {
        let shared = shared(true);
        let (persistent, memory) = memory_backed();
        let cache = shared.get_or_create(&persistent).unwrap();
        create(&cache, &5);
        drop(cache);
        assert!(shared.is_empty());
        assert!(shared.registry.entries.lock().is_empty());
        assert_eq!(memory.len(), 1);

        // the flushed data has another fingerprint, so this is a new cache
        let rehydrated = shared.get_or_create(&persistent).unwrap();
        assert!(create(&rehydrated, &5));
    }

    #[test_log::test]
    fn replaced_entry_survives_removal_of_the_old_cache() {
        let shared = shared(true);
        let (persistent, _memory) = memory_backed();
        let old = shared.get_or_create(&persistent).unwrap();
        let (fingerprint, old_id) = (old.fingerprint_key(), old.id());

        // a newer cache takes over the fingerprint before the old one is gone
        let newer = Arc::new(PipelineCache::with_initial_data(
            Arc::clone(shared.backend()),
            persistent.clone(),
            Some(gpu_persistent_cache::blob::Blob::empty()),
        ));
        shared.registry.entries.lock().insert(
            fingerprint,
            Entry {
                id: newer.id(),
                cache: Arc::downgrade(&newer),
            },
        );
        newer.attach(Arc::downgrade(&shared.registry));

        drop(old);
        let entries = shared.registry.entries.lock();
        assert_eq!(entries.get(&fingerprint).map(|entry| entry.id), Some(newer.id()));
        assert_ne!(newer.id(), old_id);
    }

    #[test_log::test]
    fn without_persistent_cache_the_cache_is_disconnected() {
        let shared = shared(true);
        let cache = shared.get_or_create(&PersistentCache::disabled()).unwrap();
        assert!(cache.is_disconnected());
        assert!(cache.has_library());
        assert!(shared.is_empty());
        create(&cache, &1);
        assert!(create(&cache, &1));
        drop(cache);
        assert!(shared.registry.entries.lock().is_empty());
    }

    #[test_log::test]
    fn unsupported_adapter_gets_a_passthrough() {
        let shared = shared(false);
        let (persistent, memory) = memory_backed();
        let cache = shared.get_or_create(&persistent).unwrap();
        assert_eq!(cache.state(), PipelineCacheState::Disconnected);
        assert!(!cache.has_library());
        assert!(!create(&cache, &1));
        assert!(!create(&cache, &1));
        assert!(shared.is_empty());
        drop(cache);
        assert!(memory.is_empty());
    }

    #[test_log::test]
    fn disconnecting_a_shared_cache_stops_sharing() {
        let shared = shared(true);
        let (persistent, _memory) = memory_backed();
        let first = shared.get_or_create(&persistent).unwrap();
        first.disconnect_from_cache();
        assert!(shared.is_empty());
        let second = shared.get_or_create(&persistent).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_disconnected());
    }
}
