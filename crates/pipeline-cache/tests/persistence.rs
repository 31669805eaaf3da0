//! Pipeline libraries flushed to disk and picked up by a later process.

use std::sync::Arc;

use gpu_persistent_cache::persistent::PersistentCache;
use gpu_pipeline_cache::{
    backend::PipelineBackend,
    descriptor::ComputePipelineDescriptor,
    pipeline_cache::PipelineCacheState,
    shader::ShaderModuleSource,
    shared::SharedPipelineCaches,
    vulkan::{VulkanBackend, VulkanPciInfo, VK_UUID_SIZE},
};
use gpu_pipeline_cache_test_utils::{
    d3d12::FakeD3d12Device,
    device::{TestDevice, WRITE_SHADER},
    env::{test_cache_dir, TestEnv},
    vulkan::FakeVulkanDevice,
};

/// Runs one "process": an adapter, one device and both `write` pipelines.
/// Returns the pipelines served from the library and the shader compilations.
fn run_process<B>(env: &TestEnv, backend: B) -> anyhow::Result<(usize, usize)>
where
    B: PipelineBackend<ComputeDesc = ComputePipelineDescriptor>,
{
    let shared = SharedPipelineCaches::new(Arc::new(backend), env.config());
    let device = TestDevice::new(&shared, env.disk_cache(), env.config())?;
    let module = ShaderModuleSource::from_wgsl(WRITE_SHADER);
    for entry_point in ["write1", "write42"] {
        device.create_compute_pipeline(&module, entry_point)?;
    }
    Ok((device.pipeline_cache().hit_count(), device.shader_compile_count()))
}

#[test_log::test]
fn d3d12_library_survives_the_process() -> anyhow::Result<()> {
    let env = TestEnv::new();
    assert_eq!(run_process(&env, FakeD3d12Device::backend())?, (0, 2));
    // two shaders and the library
    assert_eq!(std::fs::read_dir(test_cache_dir()?)?.count(), 3);

    let shared = SharedPipelineCaches::new(Arc::new(FakeD3d12Device::backend()), env.config());
    let device = TestDevice::new(&shared, env.disk_cache(), env.config())?;
    assert_eq!(device.pipeline_cache().state(), PipelineCacheState::Ready);
    let module = ShaderModuleSource::from_wgsl(WRITE_SHADER);
    for entry_point in ["write1", "write42"] {
        let outcome = device.create_compute_pipeline(&module, entry_point)?;
        assert!(outcome.from_library);
    }
    assert_eq!(device.shader_compile_count(), 0);
    assert_eq!(shared.backend().device().compile_count(), 0);
    Ok(())
}

#[test_log::test]
fn vulkan_library_survives_the_process() -> anyhow::Result<()> {
    let env = TestEnv::new();
    assert_eq!(run_process(&env, FakeVulkanDevice::backend())?, (0, 2));
    assert_eq!(run_process(&env, FakeVulkanDevice::backend())?, (2, 0));
    Ok(())
}

#[test_log::test]
fn growing_vulkan_cache_is_flushed_in_part() -> anyhow::Result<()> {
    let env = TestEnv::new();
    let pci_info = VulkanPciInfo::new(0x10de, 0x2684, [7; VK_UUID_SIZE]);
    let growing = VulkanBackend::new(FakeVulkanDevice::growing(pci_info, 64));
    assert_eq!(run_process(&env, growing)?, (0, 2));

    let stable = VulkanBackend::new(FakeVulkanDevice::new(pci_info));
    assert_eq!(run_process(&env, stable)?, (2, 0));
    Ok(())
}

#[test_log::test]
fn library_of_another_vulkan_device_is_ignored() -> anyhow::Result<()> {
    let env = TestEnv::new();
    let mut uuid = [0; VK_UUID_SIZE];
    let original = VulkanBackend::new(FakeVulkanDevice::new(VulkanPciInfo::new(0x1002, 0x744c, uuid)));
    assert_eq!(run_process(&env, original)?, (0, 2));

    // a driver update changes the cache UUID and with it the library key
    uuid[0] = 1;
    let updated = VulkanBackend::new(FakeVulkanDevice::new(VulkanPciInfo::new(0x1002, 0x744c, uuid)));
    let (hits, shader_compiles) = run_process(&env, updated)?;
    assert_eq!(hits, 0);
    assert_eq!(shader_compiles, 0);
    Ok(())
}

#[test_log::test]
fn nothing_is_written_without_persistence() -> anyhow::Result<()> {
    let env = TestEnv::new();
    let mut config = env.config();
    config.persistent = false;
    let persistent = PersistentCache::from_config(&config)?;
    assert!(!persistent.is_enabled());

    let shared = SharedPipelineCaches::new(Arc::new(FakeD3d12Device::backend()), config.clone());
    let device = TestDevice::new(&shared, persistent, config)?;
    assert!(device.pipeline_cache().is_disconnected());
    assert!(shared.is_empty());

    let module = ShaderModuleSource::from_wgsl(WRITE_SHADER);
    device.create_compute_pipeline(&module, "write1")?;
    assert!(device.create_compute_pipeline(&module, "write1")?.from_library);
    drop(device);
    assert_eq!(std::fs::read_dir(env.cache_dir())?.count(), 0);
    Ok(())
}

#[test_log::test]
fn debug_builds_write_nothing_to_disk() -> anyhow::Result<()> {
    let env = TestEnv::new();
    let mut config = env.config();
    config.unstable_shader_metadata = true;
    config.disable_shader_caching = true;

    let shared = SharedPipelineCaches::new(Arc::new(FakeD3d12Device::backend()), config.clone());
    let device = TestDevice::new(&shared, env.disk_cache(), config)?;
    let module = ShaderModuleSource::from_wgsl(WRITE_SHADER);
    let outcome = device.create_compute_pipeline(&module, "write1")?;
    assert!(!outcome.stored);
    drop(device);

    // neither the shader nor an untouched library reached the disk
    assert_eq!(std::fs::read_dir(env.cache_dir())?.count(), 0);
    Ok(())
}
