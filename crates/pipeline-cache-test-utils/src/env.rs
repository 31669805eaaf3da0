//! A scratch cache directory per test.

use core::cell::RefCell;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use gpu_persistent_cache::{config::CacheConfig, persistent::PersistentCache};
use tempfile::TempDir;

/// `TestEnv` sets up a temp dir that is used as the on-disk cache directory.
/// Dropping `TestEnv` will clean up the dir, except when panic unwinding, so
/// you can inspect the cache files of failed tests.
#[must_use]
pub struct TestEnv(TempDir);

impl TestEnv {
    /// Create a new [`TestEnv`]
    pub fn new() -> Self {
        let test_dir = tempfile::Builder::new()
            .prefix("gpu-pipeline-cache-test")
            .tempdir()
            .unwrap();

        let had_old = TESTDIR.replace(Some(test_dir.path().to_path_buf())).is_some();
        assert!(!had_old, "TestEnv is not reentrant!");

        Self(test_dir)
    }

    /// Returns the cache directory of this environment.
    pub fn cache_dir(&self) -> &Path {
        self.0.path()
    }

    /// Returns a configuration that caches on disk in this environment, with
    /// deterministic shader compilation.
    pub fn config(&self) -> CacheConfig {
        let mut config = CacheConfig::default();
        config.cache_dir = Some(self.cache_dir().to_path_buf());
        config.unstable_shader_metadata = false;
        config
    }

    /// Opens the on-disk cache of this environment, as a new process would.
    pub fn disk_cache(&self) -> PersistentCache {
        PersistentCache::from_config(&self.config()).unwrap()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        TESTDIR.replace(None);
        // when a test fails, keep directory
        if std::thread::panicking() {
            self.0.disable_cleanup(true);
        }
    }
}

thread_local! {
    static TESTDIR: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// The cache directory of the current thread's [`TestEnv`].
///
/// # Errors
///
/// Fails if no [`TestEnv`] is alive on this thread.
pub fn test_cache_dir() -> anyhow::Result<PathBuf> {
    TESTDIR.with_borrow(Clone::clone).context(
        "TestEnv is not initialized! Add `let env = TestEnv::new();` to the beginning of your test",
    )
}
