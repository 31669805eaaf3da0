//! A device creating compute pipelines the way a GPU device would.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gpu_persistent_cache::{config::CacheConfig, persistent::PersistentCache};
use gpu_pipeline_cache::{
    backend::{PipelineBackend, PipelineDescriptor},
    descriptor::{
        BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType, ComputePipelineDescriptor,
        PipelineLayoutDescriptor, ProgrammableStage, ShaderStages,
    },
    pipeline_cache::{PipelineCache, PipelineOutcome},
    shader::{load_or_compile, ShaderModuleSource, ShaderStage},
    shared::SharedPipelineCaches,
};

/// WGSL of a module with the entry points `write1` and `write42`, which store
/// their number into a storage buffer.
pub const WRITE_SHADER: &str = "\
@group(0) @binding(0) var<storage, read_write> output: u32;

@compute @workgroup_size(1) fn write1() {
    output = 1u;
}

@compute @workgroup_size(1) fn write42() {
    output = 42u;
}
";

/// One device on an adapter: a persistent cache, configuration and the
/// pipeline cache obtained from the adapter's [`SharedPipelineCaches`].
pub struct TestDevice<B: PipelineBackend<ComputeDesc = ComputePipelineDescriptor>> {
    /// The device's view on the persistent store.
    persistent: PersistentCache,
    /// Cache settings.
    config: CacheConfig,
    /// The device's pipeline cache.
    pipeline_cache: Arc<PipelineCache<B>>,
    /// Layout shared by every pipeline of the device.
    layout: Arc<PipelineLayoutDescriptor>,
    /// Shader compilations so far.
    shader_compiles: AtomicUsize,
}

impl<B: PipelineBackend<ComputeDesc = ComputePipelineDescriptor>> TestDevice<B> {
    /// Creates a device on the adapter of `shared`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device's pipeline cache cannot be created.
    pub fn new(
        shared: &SharedPipelineCaches<B>,
        persistent: PersistentCache,
        config: CacheConfig,
    ) -> anyhow::Result<Self> {
        let pipeline_cache = shared.get_or_create(&persistent)?;
        let bind_group = BindGroupLayoutDescriptor::new(vec![BindGroupLayoutEntry::new(
            0,
            ShaderStages::COMPUTE,
            BindingType::StorageBuffer,
        )]);
        Ok(Self {
            persistent,
            config,
            pipeline_cache,
            layout: Arc::new(PipelineLayoutDescriptor::new(vec![Arc::new(bind_group)])),
            shader_compiles: AtomicUsize::new(0),
        })
    }

    /// Creates the compute pipeline running `entry_point` of `module`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader or the pipeline fails to compile.
    pub fn create_compute_pipeline(
        &self,
        module: &ShaderModuleSource,
        entry_point: &str,
    ) -> anyhow::Result<PipelineOutcome<B::Pipeline>> {
        let key = module.cache_key(entry_point, ShaderStage::Compute);
        let shader = load_or_compile(&self.persistent, &self.config, &key, || {
            self.compile_shader(module, entry_point)
        })?;
        let descriptor = ComputePipelineDescriptor::new(
            Arc::clone(&self.layout),
            ProgrammableStage::new(ShaderStage::Compute, shader.bytecode, entry_point),
        );
        let outcome = self.pipeline_cache.get_or_create(
            PipelineDescriptor::Compute(&descriptor),
            descriptor.descriptor_key(),
            shader.use_pipeline_library,
        )?;
        Ok(outcome)
    }

    /// "Compiles" a shader; with unstable metadata every compilation differs.
    fn compile_shader(&self, module: &ShaderModuleSource, entry_point: &str) -> anyhow::Result<Vec<u8>> {
        let compilation = self.shader_compiles.fetch_add(1, Ordering::SeqCst);
        if module.wgsl().is_empty() && module.spirv().is_empty() {
            anyhow::bail!("shader module `{entry_point}` has no source");
        }
        let mut bytecode = format!("DXBC:{entry_point}:{}", module.wgsl().len()).into_bytes();
        if self.config.unstable_shader_metadata {
            bytecode.extend_from_slice(format!(":debug-{compilation}").as_bytes());
        }
        Ok(bytecode)
    }

    /// Returns the number of shader compilations.
    pub fn shader_compile_count(&self) -> usize {
        self.shader_compiles.load(Ordering::SeqCst)
    }

    /// Returns the device's pipeline cache.
    pub const fn pipeline_cache(&self) -> &Arc<PipelineCache<B>> {
        &self.pipeline_cache
    }
}
