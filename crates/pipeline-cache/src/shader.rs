//! Shader bytecode, compiled once and reused through the persistent cache.

use core::fmt;

use gpu_persistent_cache::{
    blob::Blob,
    config::CacheConfig,
    fingerprint::{FingerprintRecorder, Record},
    key::PersistentCacheKey,
    persistent::PersistentCache,
};

/// A programmable stage of a pipeline.
///
/// The discriminants are part of shader cache keys and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[expect(clippy::exhaustive_enums, reason = "new stages change every cache key anyway")]
pub enum ShaderStage {
    /// Vertex shading.
    Vertex = 0,
    /// Fragment shading.
    Fragment = 1,
    /// Compute.
    Compute = 2,
}

impl ShaderStage {
    /// Returns the numeric value used in cache keys.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Vertex => 0,
            Self::Fragment => 1,
            Self::Compute => 2,
        }
    }
}

impl fmt::Display for ShaderStage {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
            Self::Compute => f.write_str("compute"),
        }
    }
}

impl Record for ShaderStage {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        recorder.record(&self.as_u32());
    }
}

/// The source a shader module was created from.
///
/// Either representation may be empty; both are folded into cache keys.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShaderModuleSource {
    /// WGSL text.
    wgsl: String,
    /// SPIR-V words.
    spirv: Vec<u32>,
}

impl ShaderModuleSource {
    /// A module written in WGSL.
    #[inline]
    #[must_use]
    pub fn from_wgsl<S: Into<String>>(wgsl: S) -> Self {
        Self {
            wgsl: wgsl.into(),
            spirv: Vec::new(),
        }
    }

    /// A module given as SPIR-V.
    #[inline]
    #[must_use]
    pub fn from_spirv<W: Into<Vec<u32>>>(spirv: W) -> Self {
        Self {
            wgsl: String::new(),
            spirv: spirv.into(),
        }
    }

    /// Returns the WGSL text, empty for SPIR-V modules.
    #[inline]
    #[must_use]
    pub fn wgsl(&self) -> &str {
        &self.wgsl
    }

    /// Returns the SPIR-V words, empty for WGSL modules.
    #[inline]
    #[must_use]
    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }

    /// Returns the persistent cache key of the bytecode compiled for
    /// `entry_point` of `stage`.
    ///
    /// The key is the length-prefixed WGSL text, the SPIR-V word count
    /// followed by every word as eight hex digits, the stage as a single
    /// decimal digit and the entry point. Every field but the last has a
    /// fixed or stated width, so distinct sources never share a key.
    #[inline]
    #[must_use]
    pub fn cache_key(&self, entry_point: &str, stage: ShaderStage) -> PersistentCacheKey {
        let mut builder = PersistentCacheKey::builder()
            .length(self.wgsl.len())
            .str(&self.wgsl)
            .length(self.spirv.len());
        for word in &self.spirv {
            builder = builder.padded_hex(*word);
        }
        builder.decimal(stage.as_u32()).str(entry_point).build()
    }
}

/// Bytecode ready to be put in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct CompiledShader {
    /// The compiled bytecode.
    pub bytecode: Blob,
    /// The bytecode was loaded from the persistent cache, no compiler ran.
    pub from_cache: bool,
    /// Pipelines using this bytecode may be looked up in and stored to a
    /// pipeline library.
    pub use_pipeline_library: bool,
}

/// Loads the bytecode stored under `key`, or compiles it with `compile` and
/// stores the result.
///
/// Bytecode is not stored when `config` disables shader caching. Pipelines may
/// use a pipeline library when the bytecode is persisted, or when compiling
/// is deterministic (see [`CacheConfig::unstable_shader_metadata`]).
///
/// # Errors
///
/// Returns the error of `compile` unchanged.
#[inline]
pub fn load_or_compile<E, F>(
    persistent: &PersistentCache,
    config: &CacheConfig,
    key: &PersistentCacheKey,
    compile: F,
) -> Result<CompiledShader, E>
where
    F: FnOnce() -> Result<Vec<u8>, E>,
{
    let mut compiled = None;
    let cached = persistent.get_or_create(key, |do_cache| {
        let bytecode = compile()?;
        if !config.disable_shader_caching {
            do_cache(&bytecode);
        }
        compiled = Some(Blob::from(bytecode));
        Ok(())
    })?;

    let from_cache = compiled.is_none();
    let (bytecode, persisted) = match cached {
        Some(blob) if !blob.is_empty() => (blob, true),
        Some(_) | None => (compiled.unwrap_or_default(), false),
    };
    log::debug!(
        "shader bytecode of {} bytes {}",
        bytecode.len(),
        if from_cache {
            "loaded from persistent cache"
        } else if persisted {
            "compiled and persisted"
        } else {
            "compiled"
        }
    );

    Ok(CompiledShader {
        bytecode,
        from_cache,
        use_pipeline_library: persisted || !config.unstable_shader_metadata,
    })
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use gpu_persistent_cache::caching::{CachingInterface, MemoryCache};

    use super::*;

    fn memory_backed() -> (PersistentCache, Arc<MemoryCache>) {
        let memory = Arc::new(MemoryCache::new());
        let cache = PersistentCache::new(Some(Arc::clone(&memory) as Arc<dyn CachingInterface>));
        (cache, memory)
    }

    fn stable_config() -> CacheConfig {
        let mut config = CacheConfig::default();
        config.unstable_shader_metadata = false;
        config
    }

    #[test_log::test]
    fn stage_values_are_stable() {
        assert_eq!(ShaderStage::Vertex.as_u32(), 0);
        assert_eq!(ShaderStage::Fragment.as_u32(), 1);
        assert_eq!(ShaderStage::Compute.as_u32(), 2);
    }

    #[test_log::test]
    fn cache_key_layout() {
        let wgsl = ShaderModuleSource::from_wgsl("@compute fn main() {}");
        assert_eq!(
            wgsl.cache_key("main", ShaderStage::Compute).to_string(),
            "0000000000000015@compute fn main() {}00000000000000002main"
        );

        let spirv = ShaderModuleSource::from_spirv(vec![0x0723_0203, 0x0001_0000]);
        assert_eq!(
            spirv.cache_key("write1", ShaderStage::Fragment).to_string(),
            "0000000000000000000000000000000207230203000100001write1"
        );
    }

    #[test_log::test]
    fn cache_keys_of_different_sources_never_collide() {
        let low = ShaderModuleSource::from_spirv(vec![0x1, 0x23]);
        let high = ShaderModuleSource::from_spirv(vec![0x12, 0x3]);
        assert_ne!(
            low.cache_key("main", ShaderStage::Compute),
            high.cache_key("main", ShaderStage::Compute)
        );

        // the entry point may start with a digit
        let short = ShaderModuleSource::from_wgsl("a").cache_key("1b", ShaderStage::Compute);
        let long = ShaderModuleSource::from_wgsl("a2").cache_key("b", ShaderStage::Fragment);
        assert_ne!(short, long);

        // WGSL text that spells out SPIR-V words
        let text = ShaderModuleSource::from_wgsl("00000001").cache_key("main", ShaderStage::Compute);
        let words = ShaderModuleSource::from_spirv(vec![0x1]).cache_key("main", ShaderStage::Compute);
        assert_ne!(text, words);
    }

    #[test_log::test]
    fn cache_key_depends_on_entry_point_and_stage() {
        let module = ShaderModuleSource::from_wgsl("source");
        let write1 = module.cache_key("write1", ShaderStage::Compute);
        let write42 = module.cache_key("write42", ShaderStage::Compute);
        let vertex = module.cache_key("write1", ShaderStage::Vertex);
        assert_ne!(write1, write42);
        assert_ne!(write1, vertex);
    }

    #[test_log::test]
    fn compiles_once_then_loads() {
        let (persistent, memory) = memory_backed();
        let config = stable_config();
        let key = ShaderModuleSource::from_wgsl("source").cache_key("main", ShaderStage::Compute);

        let first = load_or_compile(&persistent, &config, &key, || {
            Ok::<_, &str>(b"DXBC".to_vec())
        })
        .unwrap();
        assert!(!first.from_cache);
        assert!(first.use_pipeline_library);
        assert_eq!(first.bytecode.data(), b"DXBC");
        assert_eq!(memory.len(), 1);

        let second = load_or_compile(&persistent, &config, &key, || {
            Err("compiler must not run on a hit")
        })
        .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.bytecode, first.bytecode);
    }

    #[test_log::test]
    fn disabled_shader_caching_keeps_bytecode_out_of_the_store() {
        let (persistent, memory) = memory_backed();
        let mut config = CacheConfig::default();
        config.disable_shader_caching = true;
        config.unstable_shader_metadata = true;
        let key = ShaderModuleSource::from_wgsl("source").cache_key("main", ShaderStage::Compute);

        let shader =
            load_or_compile(&persistent, &config, &key, || Ok::<_, &str>(b"DXBC".to_vec()))
                .unwrap();
        assert_eq!(shader.bytecode.data(), b"DXBC");
        assert!(!shader.from_cache);
        assert!(!shader.use_pipeline_library);
        assert!(memory.is_empty());
    }

    #[test_log::test]
    fn unstable_metadata_is_fine_once_persisted() {
        let (persistent, _memory) = memory_backed();
        let mut config = CacheConfig::default();
        config.unstable_shader_metadata = true;
        let key = ShaderModuleSource::from_wgsl("source").cache_key("main", ShaderStage::Compute);

        let shader =
            load_or_compile(&persistent, &config, &key, || Ok::<_, &str>(b"DXBC".to_vec()))
                .unwrap();
        assert!(shader.use_pipeline_library);
    }

    #[test_log::test]
    fn compile_errors_propagate() {
        let (persistent, memory) = memory_backed();
        let key = ShaderModuleSource::from_wgsl("broken").cache_key("main", ShaderStage::Compute);
        let result = load_or_compile(&persistent, &stable_config(), &key, || {
            Err::<Vec<u8>, _>("syntax error")
        });
        assert_eq!(result, Err("syntax error"));
        assert!(memory.is_empty());
    }
}
