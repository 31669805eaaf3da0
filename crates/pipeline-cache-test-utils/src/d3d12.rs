//! A D3D12 driver whose pipeline libraries live in memory.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::BTreeMap;

use gpu_pipeline_cache::{
    d3d12::{D3d12Backend, D3d12Device, D3d12PciInfo, HResult},
    descriptor::{ComputePipelineDescriptor, RenderPipelineDescriptor},
};

use crate::FakePipeline;

/// A serialized fake library: the adapter it belongs to and its pipelines by name.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct FakeD3d12Library {
    /// PCI device id of the adapter that created the library.
    device_id: u32,
    /// Stored pipelines by name.
    pipelines: BTreeMap<String, FakePipeline>,
}

impl FakeD3d12Library {
    /// Returns the number of stored pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns `true` if no pipeline is stored.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// A fake `ID3D12Device1` with pipeline library support.
#[derive(Debug)]
pub struct FakeD3d12Device {
    /// Identity of the adapter.
    pci_info: D3d12PciInfo,
    /// Whether pipeline libraries are supported.
    supports_library: bool,
    /// Pipelines compiled from scratch.
    compiles: AtomicUsize,
}

impl FakeD3d12Device {
    /// An adapter with pipeline library support.
    #[must_use]
    pub const fn new(pci_info: D3d12PciInfo) -> Self {
        Self {
            pci_info,
            supports_library: true,
            compiles: AtomicUsize::new(0),
        }
    }

    /// An adapter whose driver has no pipeline libraries.
    #[must_use]
    pub const fn without_library_support(pci_info: D3d12PciInfo) -> Self {
        Self {
            pci_info,
            supports_library: false,
            compiles: AtomicUsize::new(0),
        }
    }

    /// A backend for a typical adapter.
    #[must_use]
    pub const fn backend() -> D3d12Backend<Self> {
        D3d12Backend::new(Self::new(D3d12PciInfo::new(0x10de, 0x2684, 0x16f3_10de)))
    }

    /// Returns the number of pipelines compiled from scratch.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// Counts a compilation.
    fn compiled(&self, pipeline: FakePipeline) -> FakePipeline {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        log::trace!("fake D3D12 driver compiled `{}`", pipeline.entry_point);
        pipeline
    }

    /// Looks up `name`, checking that it was stored for the same descriptor.
    fn load(library: &FakeD3d12Library, name: &str, expected: &FakePipeline) -> Result<FakePipeline, HResult> {
        match library.pipelines.get(name) {
            Some(pipeline) if pipeline == expected => Ok(pipeline.clone()),
            // D3D12 rejects a name whose stored pipeline has another description
            Some(_) | None => Err(HResult::E_INVALIDARG),
        }
    }
}

impl D3d12Device for FakeD3d12Device {
    type Library = FakeD3d12Library;
    type PipelineState = FakePipeline;
    type GraphicsDesc = RenderPipelineDescriptor;
    type ComputeDesc = ComputePipelineDescriptor;

    fn pci_info(&self) -> D3d12PciInfo {
        self.pci_info
    }

    fn supports_pipeline_library(&self) -> bool {
        self.supports_library
    }

    fn create_pipeline_library(&self, blob: &[u8]) -> Result<FakeD3d12Library, HResult> {
        if blob.is_empty() {
            return Ok(FakeD3d12Library {
                device_id: self.pci_info.device_id,
                pipelines: BTreeMap::new(),
            });
        }
        let library: FakeD3d12Library =
            serde_json::from_slice(blob).map_err(|_err| HResult::E_INVALIDARG)?;
        if library.device_id != self.pci_info.device_id {
            return Err(HResult::D3D12_ERROR_ADAPTER_NOT_FOUND);
        }
        Ok(library)
    }

    fn load_graphics_pipeline(
        &self,
        library: &FakeD3d12Library,
        name: &str,
        desc: &RenderPipelineDescriptor,
    ) -> Result<FakePipeline, HResult> {
        Self::load(library, name, &FakePipeline::compile_render(desc))
    }

    fn load_compute_pipeline(
        &self,
        library: &FakeD3d12Library,
        name: &str,
        desc: &ComputePipelineDescriptor,
    ) -> Result<FakePipeline, HResult> {
        Self::load(library, name, &FakePipeline::compile(desc))
    }

    fn create_graphics_pipeline_state(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> Result<FakePipeline, HResult> {
        Ok(self.compiled(FakePipeline::compile_render(desc)))
    }

    fn create_compute_pipeline_state(
        &self,
        desc: &ComputePipelineDescriptor,
    ) -> Result<FakePipeline, HResult> {
        if desc.compute().bytecode().is_empty() {
            return Err(HResult::E_INVALIDARG);
        }
        Ok(self.compiled(FakePipeline::compile(desc)))
    }

    fn store_pipeline(
        &self,
        library: &mut FakeD3d12Library,
        name: &str,
        pipeline: &FakePipeline,
    ) -> Result<(), HResult> {
        if library.pipelines.contains_key(name) {
            return Err(HResult::E_INVALIDARG);
        }
        library.pipelines.insert(name.to_owned(), pipeline.clone());
        Ok(())
    }

    fn library_serialized_size(&self, library: &FakeD3d12Library) -> usize {
        serde_json::to_vec(library).map_or(0, |bytes| bytes.len())
    }

    fn serialize_library(&self, library: &FakeD3d12Library, data: &mut [u8]) -> Result<(), HResult> {
        let bytes = serde_json::to_vec(library).map_err(|_err| HResult::E_FAIL)?;
        if bytes.len() != data.len() {
            return Err(HResult::E_INVALIDARG);
        }
        data.copy_from_slice(&bytes);
        Ok(())
    }
}
