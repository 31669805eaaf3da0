//! Errors of pipeline caches.

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use crate::backend::PipelineKind;

/// An error indicating that a pipeline cache operation failed in the native API.
///
/// Misses and declined persistence are never reported as errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineCacheError<E> {
    /// Failed to create the native pipeline library.
    #[error("failed to create pipeline library: {0}")]
    CreateLibrary(#[source] E),
    /// Failed to look up a pipeline in the library.
    #[error("failed to load {kind} pipeline `{name}` from pipeline library: {source}")]
    LoadPipeline {
        /// Kind of the pipeline.
        kind: PipelineKind,
        /// Name of the pipeline in the library.
        name: String,
        /// The source of the error.
        source: E,
    },
    /// Failed to compile a pipeline.
    #[error("failed to compile {kind} pipeline: {source}")]
    CompilePipeline {
        /// Kind of the pipeline.
        kind: PipelineKind,
        /// The source of the error.
        source: E,
    },
    /// Failed to add a pipeline to the library.
    #[error("failed to store {kind} pipeline `{name}` in pipeline library: {source}")]
    StorePipeline {
        /// Kind of the pipeline.
        kind: PipelineKind,
        /// Name of the pipeline in the library.
        name: String,
        /// The source of the error.
        source: E,
    },
    /// Failed to serialize the library.
    #[error("failed to serialize pipeline library: {0}")]
    SerializeLibrary(#[source] E),
}
