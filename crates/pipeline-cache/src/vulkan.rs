//! Pipeline libraries on Vulkan (`VkPipelineCache`).
//!
//! A Vulkan pipeline cache has no named entries: the driver consults and
//! extends it while creating pipelines. A lookup by name therefore always
//! misses, and whether creation was served by the cache is read from
//! `VK_EXT_pipeline_creation_feedback`.

use core::fmt;

use gpu_persistent_cache::key::PersistentCacheKey;

use crate::backend::{CompiledPipeline, DescriptorOf, PipelineBackend, PipelineDescriptor, StoreStatus};

/// `VK_UUID_SIZE`.
pub const VK_UUID_SIZE: usize = 16;

/// Size of the header every serialized pipeline cache starts with.
pub const PIPELINE_CACHE_HEADER_SIZE: usize = 16 + VK_UUID_SIZE;

/// A Vulkan `VkResult` status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VkResult(pub i32);

impl VkResult {
    /// `VK_SUCCESS`.
    pub const SUCCESS: Self = Self(0);
    /// `VK_NOT_READY`.
    pub const NOT_READY: Self = Self(1);
    /// `VK_INCOMPLETE`, the output buffer was too small for all data.
    pub const INCOMPLETE: Self = Self(5);
    /// `VK_ERROR_OUT_OF_HOST_MEMORY`.
    pub const ERROR_OUT_OF_HOST_MEMORY: Self = Self(-1);
    /// `VK_ERROR_OUT_OF_DEVICE_MEMORY`.
    pub const ERROR_OUT_OF_DEVICE_MEMORY: Self = Self(-2);
    /// `VK_ERROR_INITIALIZATION_FAILED`.
    pub const ERROR_INITIALIZATION_FAILED: Self = Self(-3);
    /// `VK_ERROR_DEVICE_LOST`.
    pub const ERROR_DEVICE_LOST: Self = Self(-4);

    /// Returns `true` for `VK_SUCCESS` only.
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }
}

impl fmt::Display for VkResult {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SUCCESS => "VK_SUCCESS",
            Self::NOT_READY => "VK_NOT_READY",
            Self::INCOMPLETE => "VK_INCOMPLETE",
            Self::ERROR_OUT_OF_HOST_MEMORY => "VK_ERROR_OUT_OF_HOST_MEMORY",
            Self::ERROR_OUT_OF_DEVICE_MEMORY => "VK_ERROR_OUT_OF_DEVICE_MEMORY",
            Self::ERROR_INITIALIZATION_FAILED => "VK_ERROR_INITIALIZATION_FAILED",
            Self::ERROR_DEVICE_LOST => "VK_ERROR_DEVICE_LOST",
            Self(code) => return write!(f, "VkResult {code}"),
        };
        f.write_str(name)
    }
}

/// An error indicating that a native Vulkan call failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("`{call}` failed with {result}")]
#[non_exhaustive]
pub struct VulkanError {
    /// The failed native call.
    pub call: &'static str,
    /// Its status code.
    pub result: VkResult,
}

impl VulkanError {
    /// Attributes `result` to `call`.
    #[inline]
    #[must_use]
    pub const fn new(call: &'static str, result: VkResult) -> Self {
        Self { call, result }
    }
}

/// Identity of a Vulkan physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct VulkanPciInfo {
    /// `VkPhysicalDeviceProperties::vendorID`.
    pub vendor_id: u32,
    /// `VkPhysicalDeviceProperties::deviceID`.
    pub device_id: u32,
    /// `VkPhysicalDeviceProperties::pipelineCacheUUID`.
    pub pipeline_cache_uuid: [u8; VK_UUID_SIZE],
}

impl VulkanPciInfo {
    /// Describes a physical device.
    #[inline]
    #[must_use]
    pub const fn new(vendor_id: u32, device_id: u32, pipeline_cache_uuid: [u8; VK_UUID_SIZE]) -> Self {
        Self {
            vendor_id,
            device_id,
            pipeline_cache_uuid,
        }
    }
}

/// `VkPipelineCreationFeedback` of one pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct PipelineCreationFeedback {
    /// `VkPipelineCreationFeedbackFlags`.
    pub flags: u32,
    /// Time spent creating the pipeline, in nanoseconds.
    pub duration: u64,
}

impl PipelineCreationFeedback {
    /// `VK_PIPELINE_CREATION_FEEDBACK_VALID_BIT`.
    pub const VALID: u32 = 0x1;
    /// `VK_PIPELINE_CREATION_FEEDBACK_APPLICATION_PIPELINE_CACHE_HIT_BIT`.
    pub const APPLICATION_PIPELINE_CACHE_HIT: u32 = 0x2;

    /// Feedback with the given flags.
    #[inline]
    #[must_use]
    pub const fn new(flags: u32, duration: u64) -> Self {
        Self { flags, duration }
    }

    /// Returns `true` if the feedback is valid and reports a cache hit.
    #[inline]
    #[must_use]
    pub const fn is_application_pipeline_cache_hit(&self) -> bool {
        let hit = Self::VALID | Self::APPLICATION_PIPELINE_CACHE_HIT;
        self.flags & hit == hit
    }
}

/// The native Vulkan entry points used for pipeline caches.
pub trait VulkanDevice: Send + Sync + 'static {
    /// `VkPipelineCache`, internally synchronized.
    type PipelineCache: Send + Sync;
    /// `VkPipeline`.
    type Pipeline: Clone;
    /// `VkGraphicsPipelineCreateInfo`.
    type GraphicsDesc: ?Sized;
    /// `VkComputePipelineCreateInfo`.
    type ComputeDesc: ?Sized;

    /// Returns the identity of the physical device.
    fn pci_info(&self) -> VulkanPciInfo;

    /// `vkCreatePipelineCache`; empty `initial_data` creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns the `VkResult` of a failed call.
    fn create_pipeline_cache(&self, initial_data: &[u8]) -> Result<Self::PipelineCache, VkResult>;

    /// `vkDestroyPipelineCache`.
    fn destroy_pipeline_cache(&self, cache: Self::PipelineCache);

    /// `vkGetPipelineCacheData`.
    ///
    /// Without `data`, writes the full data size into `size`. With `data`,
    /// writes at most `size` bytes, updates `size` to the number written and
    /// returns [`VkResult::INCOMPLETE`] if that was not all of it.
    fn get_pipeline_cache_data(
        &self,
        cache: &Self::PipelineCache,
        size: &mut usize,
        data: Option<&mut [u8]>,
    ) -> VkResult;

    /// `vkCreateGraphicsPipelines` for a single pipeline.
    ///
    /// # Errors
    ///
    /// Returns the `VkResult` of a failed call.
    fn create_graphics_pipeline(
        &self,
        cache: Option<&Self::PipelineCache>,
        desc: &Self::GraphicsDesc,
    ) -> Result<(Self::Pipeline, PipelineCreationFeedback), VkResult>;

    /// `vkCreateComputePipelines` for a single pipeline.
    ///
    /// # Errors
    ///
    /// Returns the `VkResult` of a failed call.
    fn create_compute_pipeline(
        &self,
        cache: Option<&Self::PipelineCache>,
        desc: &Self::ComputeDesc,
    ) -> Result<(Self::Pipeline, PipelineCreationFeedback), VkResult>;
}

/// [`PipelineBackend`] on top of a [`VulkanDevice`].
#[derive(Debug)]
pub struct VulkanBackend<D> {
    /// The native device.
    device: D,
}

impl<D: VulkanDevice> VulkanBackend<D> {
    /// Wraps a native device.
    #[inline]
    pub const fn new(device: D) -> Self {
        Self { device }
    }

    /// Returns the native device.
    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }
}

impl<D: VulkanDevice> PipelineBackend for VulkanBackend<D> {
    type Library = D::PipelineCache;
    type Pipeline = D::Pipeline;
    type GraphicsDesc = D::GraphicsDesc;
    type ComputeDesc = D::ComputeDesc;
    type Error = VulkanError;

    #[inline]
    fn supports_pipeline_library(&self) -> bool {
        true
    }

    #[inline]
    fn pipeline_cache_key(&self) -> PersistentCacheKey {
        let info = self.device.pci_info();
        let mut builder = PersistentCacheKey::builder()
            .hex(info.device_id)
            .hex(info.vendor_id);
        for byte in info.pipeline_cache_uuid {
            builder = builder.hex(byte);
        }
        builder.build()
    }

    #[inline]
    fn create_library(&self, data: &[u8]) -> Result<Self::Library, Self::Error> {
        self.device
            .create_pipeline_cache(data)
            .map_err(|result| VulkanError::new("vkCreatePipelineCache", result))
    }

    #[inline]
    fn load_pipeline(
        &self,
        _library: &Self::Library,
        _name: &str,
        _descriptor: DescriptorOf<'_, Self>,
    ) -> Result<Option<Self::Pipeline>, Self::Error> {
        Ok(None)
    }

    #[inline]
    fn create_pipeline(
        &self,
        library: Option<&Self::Library>,
        descriptor: DescriptorOf<'_, Self>,
    ) -> Result<CompiledPipeline<Self::Pipeline>, Self::Error> {
        let (pipeline, feedback) = match descriptor {
            PipelineDescriptor::Graphics(desc) => self
                .device
                .create_graphics_pipeline(library, desc)
                .map_err(|result| VulkanError::new("vkCreateGraphicsPipelines", result)),
            PipelineDescriptor::Compute(desc) => self
                .device
                .create_compute_pipeline(library, desc)
                .map_err(|result| VulkanError::new("vkCreateComputePipelines", result)),
        }?;
        if library.is_some() && feedback.is_application_pipeline_cache_hit() {
            Ok(CompiledPipeline::from_library(pipeline))
        } else {
            Ok(CompiledPipeline::compiled(pipeline))
        }
    }

    #[inline]
    fn store_pipeline(
        &self,
        _library: &mut Self::Library,
        _name: &str,
        _pipeline: &Self::Pipeline,
    ) -> Result<StoreStatus, Self::Error> {
        // the driver already added the pipeline while creating it
        Ok(StoreStatus::Stored)
    }

    #[inline]
    fn serialize_library(&self, library: &Self::Library) -> Result<Vec<u8>, Self::Error> {
        let mut size = 0;
        check_cache_data(self.device.get_pipeline_cache_data(library, &mut size, None))?;
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut data = vec![0_u8; size];
        check_cache_data(
            self.device
                .get_pipeline_cache_data(library, &mut size, Some(&mut data)),
        )?;
        data.truncate(size);
        debug_assert!(
            data.len() > PIPELINE_CACHE_HEADER_SIZE,
            "pipeline cache data holds no more than its header"
        );
        log::trace!("serialized Vulkan pipeline cache into {} bytes", data.len());
        Ok(data)
    }

    #[inline]
    fn destroy_library(&self, library: Self::Library) {
        self.device.destroy_pipeline_cache(library);
    }
}

/// Checks the result of `vkGetPipelineCacheData`, for which
/// [`VkResult::INCOMPLETE`] is a success.
fn check_cache_data(result: VkResult) -> Result<(), VulkanError> {
    match result {
        VkResult::SUCCESS => Ok(()),
        VkResult::INCOMPLETE => {
            log::debug!("pipeline cache grew while it was being serialized, keeping partial data");
            Ok(())
        }
        other => Err(VulkanError::new("vkGetPipelineCacheData", other)),
    }
}
