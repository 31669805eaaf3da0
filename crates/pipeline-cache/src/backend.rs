//! The seam between the generic [`PipelineCache`](crate::pipeline_cache::PipelineCache)
//! and a native graphics API.
//!
//! A [`PipelineBackend`] maps the native pipeline-library entry points and
//! their status codes onto a small vocabulary: a load either finds a
//! pipeline or misses, a store either stores or finds the name already
//! present, and everything else is an error of the backend.

use core::fmt;

use gpu_persistent_cache::key::PersistentCacheKey;

/// The kind of a pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_enums, reason = "there are only two kinds of pipelines")]
pub enum PipelineKind {
    /// A rasterization pipeline.
    Graphics,
    /// A compute pipeline.
    Compute,
}

impl fmt::Display for PipelineKind {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graphics => f.write_str("graphics"),
            Self::Compute => f.write_str("compute"),
        }
    }
}

/// A native pipeline descriptor of either kind.
#[derive(Debug)]
#[expect(clippy::exhaustive_enums, reason = "there are only two kinds of pipelines")]
pub enum PipelineDescriptor<'desc, G: ?Sized, C: ?Sized> {
    /// Describes a graphics pipeline.
    Graphics(&'desc G),
    /// Describes a compute pipeline.
    Compute(&'desc C),
}

impl<G: ?Sized, C: ?Sized> Clone for PipelineDescriptor<'_, G, C> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<G: ?Sized, C: ?Sized> Copy for PipelineDescriptor<'_, G, C> {}

impl<G: ?Sized, C: ?Sized> PipelineDescriptor<'_, G, C> {
    /// Returns the kind of the described pipeline.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PipelineKind {
        match self {
            Self::Graphics(_) => PipelineKind::Graphics,
            Self::Compute(_) => PipelineKind::Compute,
        }
    }
}

/// A [`PipelineDescriptor`] with the native descriptor types of backend `B`.
pub type DescriptorOf<'desc, B> = PipelineDescriptor<
    'desc,
    <B as PipelineBackend>::GraphicsDesc,
    <B as PipelineBackend>::ComputeDesc,
>;

/// A freshly compiled pipeline.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CompiledPipeline<P> {
    /// The native pipeline object.
    pub pipeline: P,
    /// The driver served the pipeline from the library it was given.
    pub library_hit: bool,
}

impl<P> CompiledPipeline<P> {
    /// A pipeline compiled from scratch.
    #[inline]
    pub const fn compiled(pipeline: P) -> Self {
        Self {
            pipeline,
            library_hit: false,
        }
    }

    /// A pipeline the driver took from the pipeline library.
    #[inline]
    pub const fn from_library(pipeline: P) -> Self {
        Self {
            pipeline,
            library_hit: true,
        }
    }
}

/// Result of storing a pipeline in a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[expect(clippy::exhaustive_enums, reason = "a store either happens or it doesn't")]
pub enum StoreStatus {
    /// The pipeline was added; the library has unsaved changes.
    Stored,
    /// A pipeline with the same name is already in the library.
    AlreadyPresent,
}

/// A native graphics API able to compile pipelines and keep them in a
/// serializable pipeline library.
///
/// One value of the backend is shared by all devices on an adapter.
pub trait PipelineBackend: Send + Sync + 'static {
    /// The native pipeline library.
    ///
    /// Shared between threads for lookups and compilation, like
    /// `ID3D12PipelineLibrary` and `VkPipelineCache` which synchronize internally.
    type Library: Send + Sync;
    /// The native pipeline state object.
    type Pipeline: Clone;
    /// The native description of a graphics pipeline.
    type GraphicsDesc: ?Sized;
    /// The native description of a compute pipeline.
    type ComputeDesc: ?Sized;
    /// A failed native call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns `true` if the driver supports pipeline libraries.
    fn supports_pipeline_library(&self) -> bool;

    /// Returns the persistent cache key of the serialized library of this adapter.
    fn pipeline_cache_key(&self) -> PersistentCacheKey;

    /// Creates a library from serialized data; empty data creates an empty library.
    ///
    /// # Errors
    ///
    /// Returns an error if the native call fails.
    fn create_library(&self, data: &[u8]) -> Result<Self::Library, Self::Error>;

    /// Looks up a pipeline by name.
    ///
    /// Returns [`None`] if the library has no pipeline of that name. May run
    /// on several threads at once for the same library.
    ///
    /// # Errors
    ///
    /// Returns an error for any native failure other than "not found".
    fn load_pipeline(
        &self,
        library: &Self::Library,
        name: &str,
        descriptor: DescriptorOf<'_, Self>,
    ) -> Result<Option<Self::Pipeline>, Self::Error>;

    /// Compiles a pipeline.
    ///
    /// `library` is provided when the driver may consult and extend it
    /// during compilation. Compilations of different pipelines against the
    /// same library run concurrently; only [`store_pipeline`](Self::store_pipeline)
    /// gets exclusive access.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    fn create_pipeline(
        &self,
        library: Option<&Self::Library>,
        descriptor: DescriptorOf<'_, Self>,
    ) -> Result<CompiledPipeline<Self::Pipeline>, Self::Error>;

    /// Adds a compiled pipeline to the library under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error for any native failure other than "already present".
    fn store_pipeline(
        &self,
        library: &mut Self::Library,
        name: &str,
        pipeline: &Self::Pipeline,
    ) -> Result<StoreStatus, Self::Error>;

    /// Serializes the whole library.
    ///
    /// # Errors
    ///
    /// Returns an error if the native call fails.
    fn serialize_library(&self, library: &Self::Library) -> Result<Vec<u8>, Self::Error>;

    /// Releases the native library.
    #[inline]
    fn destroy_library(&self, library: Self::Library) {
        drop(library);
    }
}
