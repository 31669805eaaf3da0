//! Shared code of `gpu-pipeline-cache` crates for testing.
//!
//! Provides a counting persistent store, fake D3D12 and Vulkan drivers that
//! keep their pipeline libraries in memory, a [`TestDevice`](device::TestDevice)
//! that creates compute pipelines the way a GPU device would, and a
//! [`TestEnv`](env::TestEnv) with a scratch cache directory.

#![expect(clippy::missing_panics_doc, reason = "test code panics on failure")]
#![expect(clippy::unwrap_used, reason = "test code panics on failure")]

pub mod d3d12;
pub mod device;
pub mod env;
pub mod persistent;
pub mod vulkan;

use gpu_pipeline_cache::descriptor::{ComputePipelineDescriptor, DescriptorKey, RenderPipelineDescriptor};

/// A pipeline built by one of the fake drivers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FakePipeline {
    /// [`DescriptorKey`] of the pipeline's descriptor.
    pub key: u64,
    /// Entry point of the compute or vertex stage.
    pub entry_point: String,
}

impl FakePipeline {
    /// "Compiles" a compute pipeline.
    #[must_use]
    pub fn compile(descriptor: &ComputePipelineDescriptor) -> Self {
        Self {
            key: DescriptorKey::of(descriptor).raw(),
            entry_point: descriptor.compute().entry_point().to_owned(),
        }
    }

    /// "Compiles" a render pipeline.
    #[must_use]
    pub fn compile_render(descriptor: &RenderPipelineDescriptor) -> Self {
        Self {
            key: DescriptorKey::of(descriptor).raw(),
            entry_point: descriptor.vertex().entry_point().to_owned(),
        }
    }
}
