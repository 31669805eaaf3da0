//! Immutable, reference-counted byte buffers.

use core::{fmt, ops::Deref};
use std::sync::Arc;

use crate::fingerprint::{FingerprintRecorder, Record};

/// A reference-counted, immutable byte buffer.
///
/// Cloning a [`Blob`] shares the underlying buffer, so cached payloads move
/// between layers without copying. Equality compares contents;
/// use [`Blob::ptr_eq`] to compare identity.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Blob(Arc<[u8]>);

impl Blob {
    /// Copies `data` into a new blob.
    #[inline]
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self(Arc::from(data))
    }

    /// Returns a blob with no contents, meaning "nothing persisted".
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(Arc::from(Vec::<u8>::new()))
    }

    /// Returns the contents.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.0
    }

    /// Returns `true` if both blobs share the same buffer.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Blob {
    #[inline]
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for Blob {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Blob {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Blob {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Self(Arc::from(data))
    }
}

impl From<&[u8]> for Blob {
    #[inline]
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl Record for Blob {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        recorder.record_bytes(&self.0);
    }
}

impl fmt::Debug for Blob {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn clones_share_the_buffer() {
        let blob = Blob::new(b"pipeline");
        let clone = blob.clone();
        assert!(blob.ptr_eq(&clone));
        assert_eq!(clone.data(), b"pipeline");
    }

    #[test_log::test]
    fn equality_is_by_content() {
        let first = Blob::new(&[1, 2, 3]);
        let second = Blob::from(vec![1, 2, 3]);
        assert_eq!(first, second);
        assert!(!first.ptr_eq(&second));
    }

    #[test_log::test]
    fn fingerprint_follows_content() {
        let mut first = FingerprintRecorder::new();
        first.record(&Blob::new(b"library"));
        let mut second = FingerprintRecorder::new();
        second.record(&Blob::from(b"library".to_vec()));
        let mut other = FingerprintRecorder::new();
        other.record(&Blob::new(b"libraries"));
        assert_eq!(first.key(), second.key());
        assert_ne!(first.key(), other.key());
    }

    #[test_log::test]
    fn default_is_empty() {
        let blob = Blob::default();
        assert!(blob.is_empty());
        assert_eq!(blob.len(), 0);
    }
}
