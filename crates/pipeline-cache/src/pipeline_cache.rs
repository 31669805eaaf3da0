//! A native pipeline library, hydrated from and flushed to a persistent cache.
//!
//! A [`PipelineCache`] moves through these states:
//!
//! ```text
//! Uninitialized ──hydrate──▶ Ready ──store──▶ Dirty ──flush──▶ Flushed ──store──▶ Dirty
//!
//! any state ──disconnect──▶ Disconnected          (no library) Unsupported
//! ```
//!
//! Hydration creates the native library from the initial data, which is the
//! data handed over at construction, else the data persisted under the
//! backend's cache key, else nothing. It happens once, under the write side
//! of the lock that guards every later library access. Lookups and
//! compilation only take the read side, so devices sharing a cache compile
//! in parallel; storing a pipeline and flushing take the write side.

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use core::{
    fmt, mem,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::sync::{Arc, Weak};

use gpu_persistent_cache::{
    blob::Blob,
    config::CacheConfig,
    fingerprint::{FingerprintKey, FingerprintRecorder, RecordedKey, RecordedObject},
    key::PersistentCacheKey,
    persistent::PersistentCache,
};
use parking_lot::{Mutex, RwLock};

use crate::{
    backend::{DescriptorOf, PipelineBackend, StoreStatus},
    descriptor::DescriptorKey,
    error::PipelineCacheError,
    shared::Registry,
};

/// Source of unique [`PipelineCache`] ids.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Observable state of a [`PipelineCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineCacheState {
    /// The native library has not been created yet.
    Uninitialized,
    /// The library matches the data it was created from.
    Ready,
    /// The library has pipelines that were not flushed yet.
    Dirty,
    /// Everything in the library has been flushed.
    Flushed,
    /// The cache never writes to the persistent cache.
    Disconnected,
    /// The driver has no pipeline libraries; pipelines are compiled every time.
    Unsupported,
}

/// The blueprint of a [`PipelineCache`]: the data its library is created from.
///
/// Two caches hydrated from equal data have equal fingerprints, which is how
/// [`SharedPipelineCaches`](crate::shared::SharedPipelineCaches) finds the
/// cache to share.
#[derive(Debug)]
pub struct PipelineCacheBlueprint<'data> {
    /// Initial library data, [`None`] without a persistent cache.
    data: Option<&'data Blob>,
    /// Memoized fingerprint.
    recorded: RecordedKey,
}

impl<'data> PipelineCacheBlueprint<'data> {
    /// Describes a cache created from `data`.
    #[inline]
    #[must_use]
    pub const fn new(data: Option<&'data Blob>) -> Self {
        Self {
            data,
            recorded: RecordedKey::new(),
        }
    }
}

impl RecordedObject for PipelineCacheBlueprint<'_> {
    #[inline]
    fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
        recorder.record(&self.data.cloned());
    }

    #[inline]
    fn recorded_key(&self) -> &RecordedKey {
        &self.recorded
    }
}

/// A pipeline obtained from [`PipelineCache::get_or_create`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PipelineOutcome<P> {
    /// The native pipeline.
    pub pipeline: P,
    /// The pipeline came out of the library instead of being compiled.
    pub from_library: bool,
    /// The pipeline was compiled and added to the library.
    pub stored: bool,
}

/// A native library and the bytes it was created from.
struct Library<L> {
    /// The native handle, destroyed before `data`.
    handle: L,
    /// The data the library was created from, kept alive as long as `handle`.
    data: Blob,
    /// Pipelines were added since the last flush.
    dirty: bool,
    /// The library was flushed at least once.
    flushed: bool,
}

/// The library part of a [`PipelineCache`].
enum LibraryState<L> {
    /// Waiting for the first use.
    Uninitialized {
        /// Data handed over at construction, loaded from the persistent cache if absent.
        initial_data: Option<Blob>,
    },
    /// The native library exists.
    Ready(Library<L>),
    /// There is no native library and never will be.
    Unsupported,
}

/// How a [`PipelineCache`] relates to the persistent cache and a registry.
enum Attachment<B: PipelineBackend> {
    /// Owned by one device; flushes to the persistent cache.
    Private,
    /// Shared through a registry; flushes and deregisters on drop.
    Attached(Weak<Registry<B>>),
    /// Never writes to the persistent cache and belongs to no registry.
    Disconnected,
}

/// A pipeline library of backend `B`.
///
/// Thread safe; compilation runs concurrently, stores and flushes are exclusive.
pub struct PipelineCache<B: PipelineBackend> {
    /// The native API.
    backend: Arc<B>,
    /// Where the library is loaded from and flushed to.
    persistent: PersistentCache,
    /// Key of the serialized library in the persistent cache.
    cache_key: PersistentCacheKey,
    /// Fingerprint of the data the cache was created from.
    fingerprint: FingerprintKey,
    /// Unique id, distinguishes caches with equal fingerprints.
    id: u64,
    /// The native library, written only to hydrate it and to store pipelines.
    library: RwLock<LibraryState<B::Library>>,
    /// Relation to the persistent cache and the registry.
    attachment: Mutex<Attachment<B>>,
    /// Pipelines served from the library.
    hit_count: AtomicUsize,
}

impl<B: PipelineBackend> PipelineCache<B> {
    /// Creates a private cache that loads its library from `persistent` on first use.
    ///
    /// Without library support, or when `config` disables pipeline libraries,
    /// the cache compiles every pipeline.
    #[inline]
    pub fn new(backend: Arc<B>, persistent: PersistentCache, config: &CacheConfig) -> Self {
        let library = if config.disable_pipeline_library || !backend.supports_pipeline_library() {
            log::debug!("pipeline libraries are unavailable, compiling every pipeline");
            LibraryState::Unsupported
        } else {
            LibraryState::Uninitialized { initial_data: None }
        };
        Self::with_state(
            backend,
            persistent,
            PipelineCacheBlueprint::new(None).fingerprint_key(),
            library,
            Attachment::Private,
        )
    }

    /// Creates a cache whose library is created from `initial_data` on first use.
    ///
    /// An empty blob creates an empty library; [`None`] loads from `persistent`.
    #[inline]
    pub fn with_initial_data(
        backend: Arc<B>,
        persistent: PersistentCache,
        initial_data: Option<Blob>,
    ) -> Self {
        let fingerprint = PipelineCacheBlueprint::new(initial_data.as_ref()).fingerprint_key();
        Self::with_state(
            backend,
            persistent,
            fingerprint,
            LibraryState::Uninitialized { initial_data },
            Attachment::Private,
        )
    }

    /// Creates a disconnected cache without library that compiles every pipeline.
    #[inline]
    pub fn passthrough(backend: Arc<B>, persistent: PersistentCache) -> Self {
        Self::with_state(
            backend,
            persistent,
            FingerprintKey::from_raw(0),
            LibraryState::Unsupported,
            Attachment::Disconnected,
        )
    }

    /// Creates a cache.
    fn with_state(
        backend: Arc<B>,
        persistent: PersistentCache,
        fingerprint: FingerprintKey,
        library: LibraryState<B::Library>,
        attachment: Attachment<B>,
    ) -> Self {
        let cache_key = backend.pipeline_cache_key();
        Self {
            backend,
            persistent,
            cache_key,
            fingerprint,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            library: RwLock::new(library),
            attachment: Mutex::new(attachment),
            hit_count: AtomicUsize::new(0),
        }
    }

    /// Creates the native library now instead of on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the native library cannot be created.
    #[inline]
    pub fn initialize(&self) -> Result<(), PipelineCacheError<B::Error>> {
        self.hydrate_if_necessary(&mut self.library.write())
    }

    /// Creates the native library if it does not exist yet.
    fn hydrate_if_necessary(
        &self,
        state: &mut LibraryState<B::Library>,
    ) -> Result<(), PipelineCacheError<B::Error>> {
        let LibraryState::Uninitialized { initial_data } = state else {
            return Ok(());
        };
        // the initial data stays in place until the library exists, a retry
        // after a failure sees the same data the fingerprint describes
        let data = initial_data
            .clone()
            .or_else(|| self.persistent.load_data(&self.cache_key))
            .unwrap_or_default();
        log::debug!(
            "creating pipeline library for key '{}' from {} bytes",
            self.cache_key,
            data.len()
        );
        let handle = self
            .backend
            .create_library(&data)
            .map_err(PipelineCacheError::CreateLibrary)?;
        *state = LibraryState::Ready(Library {
            handle,
            data,
            dirty: false,
            flushed: false,
        });
        Ok(())
    }

    /// Returns the pipeline described by `descriptor`, from the library if
    /// possible, compiled otherwise.
    ///
    /// `descriptor_key` names the pipeline in the library. With `use_library`
    /// unset, the library is neither consulted nor extended, for pipelines
    /// whose shaders do not compile deterministically.
    ///
    /// Lookups and compilation share the library with other threads; only
    /// hydration and storing the new pipeline lock it exclusively.
    ///
    /// # Errors
    ///
    /// Returns an error if a native call fails, including compilation.
    /// Misses are not errors.
    #[inline]
    pub fn get_or_create(
        &self,
        descriptor: DescriptorOf<'_, B>,
        descriptor_key: DescriptorKey,
        use_library: bool,
    ) -> Result<PipelineOutcome<B::Pipeline>, PipelineCacheError<B::Error>> {
        let kind = descriptor.kind();
        if matches!(*self.library.read(), LibraryState::Uninitialized { .. }) {
            self.hydrate_if_necessary(&mut self.library.write())?;
        }

        let name = descriptor_key.to_string();
        let compiled = {
            let state = self.library.read();
            let library = match &*state {
                LibraryState::Ready(library) if use_library => library,
                LibraryState::Ready(_) | LibraryState::Unsupported | LibraryState::Uninitialized { .. } => {
                    if matches!(*state, LibraryState::Ready(_)) {
                        log::debug!("{kind} pipeline bypasses the pipeline library, its shaders carry unstable metadata");
                    }
                    let compiled = self.backend.create_pipeline(None, descriptor).map_err(|source| {
                        PipelineCacheError::CompilePipeline { kind, source }
                    })?;
                    return Ok(PipelineOutcome {
                        pipeline: compiled.pipeline,
                        from_library: false,
                        stored: false,
                    });
                }
            };

            let loaded = self
                .backend
                .load_pipeline(&library.handle, &name, descriptor)
                .map_err(|source| PipelineCacheError::LoadPipeline {
                    kind,
                    name: name.clone(),
                    source,
                })?;
            if let Some(pipeline) = loaded {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                log::trace!("{kind} pipeline `{name}` loaded from pipeline library");
                return Ok(PipelineOutcome {
                    pipeline,
                    from_library: true,
                    stored: false,
                });
            }

            self.backend
                .create_pipeline(Some(&library.handle), descriptor)
                .map_err(|source| PipelineCacheError::CompilePipeline { kind, source })?
        };
        if compiled.library_hit {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            log::trace!("{kind} pipeline `{name}` created from pipeline library");
            return Ok(PipelineOutcome {
                pipeline: compiled.pipeline,
                from_library: true,
                stored: false,
            });
        }

        let mut state = self.library.write();
        let LibraryState::Ready(library) = &mut *state else {
            return Ok(PipelineOutcome {
                pipeline: compiled.pipeline,
                from_library: false,
                stored: false,
            });
        };
        let status = self
            .backend
            .store_pipeline(&mut library.handle, &name, &compiled.pipeline)
            .map_err(|source| PipelineCacheError::StorePipeline {
                kind,
                name: name.clone(),
                source,
            })?;
        let stored = match status {
            StoreStatus::Stored => {
                log::trace!("{kind} pipeline `{name}` added to pipeline library");
                library.dirty = true;
                true
            }
            StoreStatus::AlreadyPresent => {
                log::debug!("{kind} pipeline `{name}` was already in the pipeline library");
                false
            }
        };
        Ok(PipelineOutcome {
            pipeline: compiled.pipeline,
            from_library: false,
            stored,
        })
    }

    /// Writes the library to the persistent cache if it has unflushed pipelines.
    ///
    /// Returns whether data was handed to the persistent cache and accepted.
    /// Disconnected caches never write.
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be serialized.
    #[inline]
    pub fn store_pipeline_cache_data(&self) -> Result<bool, PipelineCacheError<B::Error>> {
        if self.is_disconnected() {
            return Ok(false);
        }
        let mut state = self.library.write();
        let LibraryState::Ready(library) = &mut *state else {
            return Ok(false);
        };
        if !library.dirty {
            return Ok(false);
        }

        let data = self
            .backend
            .serialize_library(&library.handle)
            .map_err(PipelineCacheError::SerializeLibrary)?;
        library.dirty = false;
        library.flushed = true;
        if data.is_empty() {
            log::warn!("pipeline library for key '{}' serialized to nothing", self.cache_key);
            return Ok(false);
        }
        let stored = self.persistent.store_data(&self.cache_key, &data);
        log::info!(
            "flushed pipeline library of {} bytes for key '{}'{}",
            data.len(),
            self.cache_key,
            if stored { "" } else { ", but the persistent cache declined it" }
        );
        Ok(stored)
    }

    /// Stops this cache from ever writing to the persistent cache.
    ///
    /// A cache shared through a registry is removed from it, so no other
    /// device picks it up afterwards.
    #[inline]
    pub fn disconnect_from_cache(&self) {
        let previous = mem::replace(&mut *self.attachment.lock(), Attachment::Disconnected);
        if let Attachment::Attached(registry) = previous {
            if let Some(registry) = registry.upgrade() {
                registry.detach(self.fingerprint, self.id);
            }
        }
        log::info!("pipeline cache {} disconnected from persistent cache", self.id);
    }

    /// Returns `true` if this cache never writes to the persistent cache.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(*self.attachment.lock(), Attachment::Disconnected)
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> PipelineCacheState {
        if self.is_disconnected() {
            return PipelineCacheState::Disconnected;
        }
        match &*self.library.read() {
            LibraryState::Uninitialized { .. } => PipelineCacheState::Uninitialized,
            LibraryState::Unsupported => PipelineCacheState::Unsupported,
            LibraryState::Ready(library) if library.dirty => PipelineCacheState::Dirty,
            LibraryState::Ready(library) if library.flushed => PipelineCacheState::Flushed,
            LibraryState::Ready(_) => PipelineCacheState::Ready,
        }
    }

    /// Returns `true` if the cache has, or will have, a native library.
    #[inline]
    pub fn has_library(&self) -> bool {
        !matches!(*self.library.read(), LibraryState::Unsupported)
    }

    /// Returns the number of pipelines served from the library so far.
    #[inline]
    pub fn hit_count(&self) -> usize {
        self.hit_count.load(Ordering::Relaxed)
    }

    /// Returns the fingerprint of the data this cache was created from.
    #[inline]
    pub const fn fingerprint_key(&self) -> FingerprintKey {
        self.fingerprint
    }

    /// Returns the unique id of this cache.
    #[inline]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the key of the serialized library in the persistent cache.
    #[inline]
    pub const fn cache_key(&self) -> &PersistentCacheKey {
        &self.cache_key
    }

    /// Returns the backend.
    #[inline]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Marks this cache as registered in `registry`.
    pub(crate) fn attach(&self, registry: Weak<Registry<B>>) {
        *self.attachment.lock() = Attachment::Attached(registry);
    }
}

impl<B: PipelineBackend> fmt::Debug for PipelineCache<B> {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCache")
            .field("id", &self.id)
            .field("cache_key", &self.cache_key.to_string())
            .field("fingerprint", &self.fingerprint)
            .field("state", &self.state())
            .field("hit_count", &self.hit_count())
            .finish_non_exhaustive()
    }
}

impl<B: PipelineBackend> Drop for PipelineCache<B> {
    #[inline]
    fn drop(&mut self) {
        if let Err(err) = self.store_pipeline_cache_data() {
            log::warn!("failed to flush pipeline library on drop: {err}");
        }

        let state = mem::replace(self.library.get_mut(), LibraryState::Unsupported);
        if let LibraryState::Ready(Library { handle, data, .. }) = state {
            self.backend.destroy_library(handle);
            drop(data);
        }

        let attachment = mem::replace(self.attachment.get_mut(), Attachment::Disconnected);
        if let Attachment::Attached(registry) = attachment {
            if let Some(registry) = registry.upgrade() {
                registry.remove_pipeline_cache(self.fingerprint, self.id);
            }
        }
    }
}
