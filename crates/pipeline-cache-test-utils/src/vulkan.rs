//! A Vulkan driver whose pipeline caches live in memory.
//!
//! Serialized caches start with the standard 32-byte header
//! (`VkPipelineCacheHeaderVersionOne`) followed by the JSON list of cached
//! pipelines. Data with a foreign header is ignored, as drivers do.

use core::sync::atomic::{AtomicUsize, Ordering};

use gpu_pipeline_cache::{
    descriptor::{ComputePipelineDescriptor, RenderPipelineDescriptor},
    vulkan::{
        PipelineCreationFeedback, VkResult, VulkanBackend, VulkanDevice, VulkanPciInfo,
        PIPELINE_CACHE_HEADER_SIZE, VK_UUID_SIZE,
    },
};
use parking_lot::Mutex;

use crate::FakePipeline;

/// A fake `VkPipelineCache`.
#[derive(Debug, Default)]
pub struct FakeVkPipelineCache {
    /// Cached pipelines in insertion order.
    pipelines: Mutex<Vec<FakePipeline>>,
}

impl FakeVkPipelineCache {
    /// Returns the number of cached pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    /// Returns `true` if no pipeline is cached.
    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().is_empty()
    }
}

/// A fake `VkDevice`.
#[derive(Debug)]
pub struct FakeVulkanDevice {
    /// Identity of the physical device.
    pci_info: VulkanPciInfo,
    /// Pipelines compiled from scratch.
    compiles: AtomicUsize,
    /// Destroyed pipeline caches.
    destroyed: AtomicUsize,
    /// Extra bytes reported by the size query but never written, to exercise
    /// `VK_INCOMPLETE`.
    phantom_growth: usize,
}

impl FakeVulkanDevice {
    /// A physical device.
    #[must_use]
    pub const fn new(pci_info: VulkanPciInfo) -> Self {
        Self {
            pci_info,
            compiles: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            phantom_growth: 0,
        }
    }

    /// A device whose cache grows between the size and the data query.
    #[must_use]
    pub const fn growing(pci_info: VulkanPciInfo, phantom_growth: usize) -> Self {
        Self {
            pci_info,
            compiles: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            phantom_growth,
        }
    }

    /// A backend for a typical physical device.
    #[must_use]
    pub fn backend() -> VulkanBackend<Self> {
        let mut uuid = [0_u8; VK_UUID_SIZE];
        for (byte, value) in uuid.iter_mut().zip(0xa0_u8..) {
            *byte = value;
        }
        VulkanBackend::new(Self::new(VulkanPciInfo::new(0x1002, 0x744c, uuid)))
    }

    /// Returns the number of pipelines compiled from scratch.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// Returns the number of destroyed pipeline caches.
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Returns the header identifying caches of this device.
    fn header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(PIPELINE_CACHE_HEADER_SIZE);
        header.extend_from_slice(&u32::try_from(PIPELINE_CACHE_HEADER_SIZE).unwrap().to_le_bytes());
        // VK_PIPELINE_CACHE_HEADER_VERSION_ONE
        header.extend_from_slice(&1_u32.to_le_bytes());
        header.extend_from_slice(&self.pci_info.vendor_id.to_le_bytes());
        header.extend_from_slice(&self.pci_info.device_id.to_le_bytes());
        header.extend_from_slice(&self.pci_info.pipeline_cache_uuid);
        header
    }

    /// Returns the full serialized form of `cache`.
    fn serialize(&self, cache: &FakeVkPipelineCache) -> Vec<u8> {
        let mut data = self.header();
        data.extend(serde_json::to_vec(&*cache.pipelines.lock()).unwrap());
        data
    }

    /// Creates `pipeline` through `cache`, reporting whether the cache had it.
    fn create(
        &self,
        cache: Option<&FakeVkPipelineCache>,
        pipeline: FakePipeline,
    ) -> (FakePipeline, PipelineCreationFeedback) {
        if let Some(cache) = cache {
            let mut pipelines = cache.pipelines.lock();
            if pipelines.contains(&pipeline) {
                let flags = PipelineCreationFeedback::VALID
                    | PipelineCreationFeedback::APPLICATION_PIPELINE_CACHE_HIT;
                return (pipeline, PipelineCreationFeedback::new(flags, 1_000));
            }
            pipelines.push(pipeline.clone());
        }
        self.compiles.fetch_add(1, Ordering::SeqCst);
        log::trace!("fake Vulkan driver compiled `{}`", pipeline.entry_point);
        (
            pipeline,
            PipelineCreationFeedback::new(PipelineCreationFeedback::VALID, 1_000_000),
        )
    }
}

impl VulkanDevice for FakeVulkanDevice {
    type PipelineCache = FakeVkPipelineCache;
    type Pipeline = FakePipeline;
    type GraphicsDesc = RenderPipelineDescriptor;
    type ComputeDesc = ComputePipelineDescriptor;

    fn pci_info(&self) -> VulkanPciInfo {
        self.pci_info
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> Result<FakeVkPipelineCache, VkResult> {
        let header = self.header();
        let pipelines = match initial_data.strip_prefix(header.as_slice()) {
            Some(body) => serde_json::from_slice(body).unwrap_or_default(),
            None => {
                if !initial_data.is_empty() {
                    log::debug!("fake Vulkan driver ignored incompatible pipeline cache data");
                }
                Vec::new()
            }
        };
        Ok(FakeVkPipelineCache {
            pipelines: Mutex::new(pipelines),
        })
    }

    fn destroy_pipeline_cache(&self, cache: FakeVkPipelineCache) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        drop(cache);
    }

    fn get_pipeline_cache_data(
        &self,
        cache: &FakeVkPipelineCache,
        size: &mut usize,
        data: Option<&mut [u8]>,
    ) -> VkResult {
        let serialized = self.serialize(cache);
        let available = serialized.len() + self.phantom_growth;
        let Some(data) = data else {
            *size = available;
            return VkResult::SUCCESS;
        };
        let written = (*size).min(data.len()).min(serialized.len());
        if let (Some(target), Some(source)) = (data.get_mut(..written), serialized.get(..written)) {
            target.copy_from_slice(source);
        }
        *size = written;
        if written < available {
            VkResult::INCOMPLETE
        } else {
            VkResult::SUCCESS
        }
    }

    fn create_graphics_pipeline(
        &self,
        cache: Option<&FakeVkPipelineCache>,
        desc: &RenderPipelineDescriptor,
    ) -> Result<(FakePipeline, PipelineCreationFeedback), VkResult> {
        Ok(self.create(cache, FakePipeline::compile_render(desc)))
    }

    fn create_compute_pipeline(
        &self,
        cache: Option<&FakeVkPipelineCache>,
        desc: &ComputePipelineDescriptor,
    ) -> Result<(FakePipeline, PipelineCreationFeedback), VkResult> {
        if desc.compute().bytecode().is_empty() {
            return Err(VkResult::ERROR_INITIALIZATION_FAILED);
        }
        Ok(self.create(cache, FakePipeline::compile(desc)))
    }
}
