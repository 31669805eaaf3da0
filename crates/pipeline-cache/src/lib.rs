//! Shareable native pipeline libraries backed by a persistent cache.
//!
//! Building a pipeline state object is the most expensive step of creating a
//! GPU pipeline. Drivers can keep built pipelines in a serializable
//! "pipeline library" (`ID3D12PipelineLibrary`, `VkPipelineCache`); this crate
//! owns such libraries, fills them on demand and writes them back to a
//! [`PersistentCache`](gpu_persistent_cache::persistent::PersistentCache), so
//! the next run of the application starts warm.
//!
//! # How it works
//!
//! * Shader bytecode is compiled through [`shader::load_or_compile`], which
//!   consults the persistent cache first.
//! * Pipeline descriptors fingerprint their contents ([`descriptor`]) and the
//!   fingerprint names the pipeline inside the library.
//! * A [`PipelineCache`](pipeline_cache::PipelineCache) drives one library
//!   through a [`PipelineBackend`](backend::PipelineBackend), implemented here
//!   for [D3D12](d3d12) and [Vulkan](vulkan) on top of small native traits.
//! * [`SharedPipelineCaches`](shared::SharedPipelineCaches) lets all devices on
//!   one adapter share the library that was loaded from the same data.

pub mod backend;
pub mod d3d12;
pub mod descriptor;
pub mod error;
pub mod pipeline_cache;
pub mod shader;
pub mod shared;
pub mod vulkan;
