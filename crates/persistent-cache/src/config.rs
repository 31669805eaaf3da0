//! Configuration of persistent pipeline caching.
//!
//! The configuration can be deserialized from TOML, for example:
//!
//! ```toml
//! cache-dir = "/var/cache/my-engine"
//! disable-shader-caching = false
//! unstable-shader-metadata = false
//! ```

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Settings of the persistent pipeline cache.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
#[expect(
    clippy::struct_excessive_bools,
    reason = "these are independent toggles"
)]
pub struct CacheConfig {
    /// Store cached data on disk so it survives process restarts.
    #[cfg_attr(feature = "clap", clap(long = "no-persistent-cache", default_value = "true", action = clap::ArgAction::SetFalse))]
    pub persistent: bool,

    /// Directory of the on-disk cache.
    ///
    /// Defaults to the `gpu-pipeline-cache` directory in the user's cache directory.
    #[cfg_attr(feature = "clap", clap(long))]
    pub cache_dir: Option<PathBuf>,

    /// Never store compiled shader bytecode in the persistent cache.
    #[cfg_attr(feature = "clap", clap(long))]
    pub disable_shader_caching: bool,

    /// Never use a native pipeline library, compile every pipeline afresh.
    #[cfg_attr(feature = "clap", clap(long))]
    pub disable_pipeline_library: bool,

    /// Compiled shaders embed debug metadata which differs between compilations.
    ///
    /// Pipelines built from such shaders are never stored in a pipeline library
    /// unless their bytecode itself comes from the persistent cache.
    #[cfg_attr(feature = "clap", clap(long))]
    pub unstable_shader_metadata: bool,
}

impl Default for CacheConfig {
    #[inline]
    fn default() -> Self {
        Self {
            persistent: true,
            cache_dir: None,
            disable_shader_caching: false,
            disable_pipeline_library: false,
            unstable_shader_metadata: cfg!(debug_assertions),
        }
    }
}

impl CacheConfig {
    /// Parses the configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid configuration.
    #[inline]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid configuration.
    #[inline]
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("reading cache configuration from '{}'", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// An error indicating that the configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read cache configuration {path}: {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// The source of the error.
        source: io::Error,
    },
    /// The configuration is not valid TOML or has unknown values.
    #[error("invalid cache configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
