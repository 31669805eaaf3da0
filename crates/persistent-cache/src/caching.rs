//! The boundary to the embedding application's key/value store.
//!
//! A [`CachingInterface`] is opaque: it only maps keys to blobs. Two
//! implementations are provided, [`MemoryCache`] for a single process and
//! [`DiskCache`] for persistence across runs.

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use core::hash::Hasher as _;
use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use tempfile::NamedTempFile;

use crate::blob::Blob;

/// An opaque key to blob store provided by the embedding application.
///
/// Lookups of absent keys are not errors. Implementations are shared between
/// devices that may live on different threads.
pub trait CachingInterface: Send + Sync {
    /// Returns the bytes last stored under `key`, or [`None`] if there are none.
    fn load_data(&self, key: &[u8]) -> Option<Blob>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Returns whether the value was accepted. Declining to store is not an error.
    fn store_data(&self, key: &[u8], value: &[u8]) -> bool;
}

/// A [`CachingInterface`] that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    /// Stored entries by key.
    entries: Mutex<FxHashMap<Vec<u8>, Blob>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every entry.
    #[inline]
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl CachingInterface for MemoryCache {
    #[inline]
    fn load_data(&self, key: &[u8]) -> Option<Blob> {
        self.entries.lock().get(key).cloned()
    }

    #[inline]
    fn store_data(&self, key: &[u8], value: &[u8]) -> bool {
        self.entries.lock().insert(key.to_vec(), Blob::new(value));
        true
    }
}

/// Returns path to the default directory of on-disk pipeline caches.
///
/// Possible values by OS are:
/// * Windows: `C:/users/<user>/AppData/Local/gpu-pipeline-cache`
/// * Mac: `~/Library/Caches/gpu-pipeline-cache`
/// * Linux: `~/.cache/gpu-pipeline-cache`
///
/// # Errors
///
/// Fails if there is no cache directory available.
#[inline]
pub fn cache_dir() -> Result<PathBuf, CacheDirError> {
    let dir = directories::BaseDirs::new()
        .ok_or(CacheDirError(()))?
        .cache_dir()
        .join("gpu-pipeline-cache");
    Ok(dir)
}

/// An error indicating that there is no cache directory available.
#[derive(Debug, Clone, thiserror::Error)]
#[error("could not find cache directory")]
pub struct CacheDirError(());

/// A [`CachingInterface`] that keeps one file per entry in a directory.
///
/// Files are named after a hash of their key and hold
/// `key length (u64, little endian) | key | value`. A file whose stored key
/// differs from the requested one is treated as a miss.
#[derive(Debug, Clone)]
pub struct DiskCache {
    /// Directory holding the entry files.
    dir: PathBuf,
}

impl DiskCache {
    /// Opens a cache in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, DiskCacheError> {
        let dir = dir.into();
        if let Err(source) = fs::create_dir_all(&dir) {
            return Err(DiskCacheError::CreateCacheDir { dir, source });
        }
        log::info!("disk cache directory is '{}'", dir.display());
        Ok(Self { dir })
    }

    /// Opens a cache in the default [cache directory](cache_dir).
    ///
    /// # Errors
    ///
    /// Returns an error if there is no cache directory or it cannot be created.
    #[inline]
    pub fn in_default_dir() -> Result<Self, DiskCacheError> {
        Self::new(cache_dir()?)
    }

    /// Returns the directory holding the entry files.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the file storing `key`.
    fn entry_path(&self, key: &[u8]) -> PathBuf {
        let mut hasher = FxHasher::default();
        hasher.write(key);
        self.dir.join(format!("{:016x}.bin", hasher.finish()))
    }

    /// Reads the entry stored under `key`, if any.
    fn read_entry(&self, key: &[u8]) -> io::Result<Option<Blob>> {
        let path = self.entry_path(key);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let Some((len_bytes, rest)) = contents.split_first_chunk::<8>() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("truncated entry header in {}", path.display()),
            ));
        };
        let stored_key_len = usize::try_from(u64::from_le_bytes(*len_bytes))
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let Some((stored_key, value)) = rest.split_at_checked(stored_key_len) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("truncated entry key in {}", path.display()),
            ));
        };

        if stored_key != key {
            log::trace!("entry {} belongs to another key", path.display());
            return Ok(None);
        }
        Ok(Some(Blob::new(value)))
    }

    /// Writes `value` under `key`, replacing the previous entry atomically.
    fn write_entry(&self, key: &[u8], value: &[u8]) -> io::Result<()> {
        let path = self.entry_path(key);
        let key_len = u64::try_from(key.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let mut contents = Vec::with_capacity(8 + key.len() + value.len());
        contents.extend_from_slice(&key_len.to_le_bytes());
        contents.extend_from_slice(key);
        contents.extend_from_slice(value);

        // every writer gets its own temp file, readers only ever see whole entries
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&contents)?;
        temp.persist(&path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl CachingInterface for DiskCache {
    #[inline]
    fn load_data(&self, key: &[u8]) -> Option<Blob> {
        match self.read_entry(key) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("failed to read disk cache entry, treating it as a miss: {err}");
                None
            }
        }
    }

    #[inline]
    fn store_data(&self, key: &[u8], value: &[u8]) -> bool {
        match self.write_entry(key, value) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("failed to write disk cache entry: {err}");
                false
            }
        }
    }
}

/// An error indicating that a [`DiskCache`] could not be opened.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DiskCacheError {
    /// There is no cache directory available.
    #[error(transparent)]
    NoCacheDir(#[from] CacheDirError),
    /// Failed to create the cache directory.
    #[error("failed to create cache directory {dir}: {source}")]
    CreateCacheDir {
        /// Path to the cache directory we tried to create.
        dir: PathBuf,
        /// The source of the error.
        source: io::Error,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.load_data(b"key"), None);
        assert!(cache.store_data(b"key", b"value"));
        assert_eq!(cache.load_data(b"key").unwrap().data(), b"value");
        assert_eq!(cache.len(), 1);
    }

    #[test_log::test]
    fn memory_cache_overwrites() {
        let cache = MemoryCache::new();
        cache.store_data(b"key", b"first");
        cache.store_data(b"key", b"second");
        assert_eq!(cache.load_data(b"key").unwrap().data(), b"second");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test_log::test]
    fn disk_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().join("nested")).unwrap();
        assert_eq!(cache.load_data(b"10de1f08"), None);
        assert!(cache.store_data(b"10de1f08", &[1, 2, 3, 4]));
        assert_eq!(cache.load_data(b"10de1f08").unwrap().data(), &[1, 2, 3, 4]);
    }

    #[test_log::test]
    fn disk_cache_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        DiskCache::new(dir.path())
            .unwrap()
            .store_data(b"shader", b"bytecode");
        let reopened = DiskCache::new(dir.path()).unwrap();
        assert_eq!(reopened.load_data(b"shader").unwrap().data(), b"bytecode");
    }

    #[test_log::test]
    fn disk_cache_rejects_foreign_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        cache.store_data(b"mine", b"value");

        // simulate a hash collision by planting another key's entry in our file
        let mut planted = Vec::new();
        planted.extend_from_slice(&5_u64.to_le_bytes());
        planted.extend_from_slice(b"other");
        planted.extend_from_slice(b"value");
        fs::write(cache.entry_path(b"mine"), planted).unwrap();

        assert_eq!(cache.load_data(b"mine"), None);
    }

    #[test_log::test]
    fn disk_cache_concurrent_stores_never_tear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        std::thread::scope(|scope| {
            for writer in 0_u8..8 {
                let cache = &cache;
                scope.spawn(move || {
                    let value = vec![writer; 4096 * (1 + usize::from(writer))];
                    for _ in 0..50 {
                        assert!(cache.store_data(b"library", &value));
                        let loaded = cache.load_data(b"library").unwrap();
                        let first = *loaded.data().first().unwrap();
                        assert_eq!(loaded.len(), 4096 * (1 + usize::from(first)));
                        assert!(loaded.data().iter().all(|byte| *byte == first));
                    }
                });
            }
        });
        // temp files are gone, only the entry is left
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test_log::test]
    fn disk_cache_treats_corrupt_entry_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        fs::write(cache.entry_path(b"key"), [1, 2, 3]).unwrap();
        assert_eq!(cache.load_data(b"key"), None);
    }
}
