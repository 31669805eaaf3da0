//! Structural fingerprinting of cacheable objects.
//!
//! A fingerprint is a deterministic hash of the fields that define an object.
//! It never involves addresses, so it is identical for equivalent objects
//! created independently, on different devices or in different processes.
//!
//! Every cacheable type implements [`RecordedObject`] and feeds its fields
//! into a [`FingerprintRecorder`] in one fixed order. That order is part of
//! the key format: changing it changes every key of the type.

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use core::{fmt, hash::Hasher as _};
use std::sync::OnceLock;

use rustc_hash::FxHasher;

/// A computed fingerprint, used as an object's identity in caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintKey(u64);

impl FingerprintKey {
    /// Wraps a raw fingerprint value.
    #[inline]
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw fingerprint value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FingerprintKey {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Visitor that accumulates an order-sensitive hash of recorded fields.
#[derive(Debug, Default)]
pub struct FingerprintRecorder {
    /// Running combined hash, seeded with zero.
    hash: u64,
}

impl FingerprintRecorder {
    /// Creates a recorder with an empty running hash.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value, dispatching on its type.
    #[inline]
    pub fn record<T: Record + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.record_into(self);
        self
    }

    /// Records a cacheable object by its fingerprint.
    ///
    /// If `object` has not been fingerprinted yet, this walks its fields once
    /// with a fresh recorder and memoizes the result on the object; later
    /// calls reuse the memoized key without walking again.
    #[inline]
    pub fn record_object<O: RecordedObject + ?Sized>(&mut self, object: &O) -> &mut Self {
        let key = object.fingerprint_key();
        self.combine(key.0);
        self
    }

    /// Records a run of bytes as a single value, preceded by its length.
    ///
    /// Cheaper than recording a `[u8]` element by element; meant for large
    /// opaque payloads such as shader bytecode or serialized libraries.
    #[inline]
    pub fn record_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.record(&bytes.len());
        self.combine_bytes(bytes);
        self
    }

    /// Returns the accumulated fingerprint.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> FingerprintKey {
        FingerprintKey(self.hash)
    }

    /// Combines a value hash into the running hash. Order-sensitive.
    fn combine(&mut self, value_hash: u64) {
        self.hash ^= value_hash
            .wrapping_add(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(self.hash << 6_u32)
            .wrapping_add(self.hash >> 2_u32);
    }

    /// Hashes raw scalar bytes and combines them into the running hash.
    fn combine_bytes(&mut self, bytes: &[u8]) {
        let mut hasher = FxHasher::default();
        hasher.write(bytes);
        self.combine(hasher.finish());
    }
}

/// A value that knows how to contribute to a [`FingerprintRecorder`].
///
/// Scalars contribute their little-endian bytes, so fingerprints do not depend
/// on the host. Sequences and strings contribute their length and then every
/// element in iteration order. Raw pointers do not implement this
/// trait: an object referenced from another one is recorded through
/// [`FingerprintRecorder::record_object`] instead.
pub trait Record {
    /// Records `self` into `recorder`.
    fn record_into(&self, recorder: &mut FingerprintRecorder);
}

/// Implements [`Record`] for scalar types through their little-endian bytes.
macro_rules! record_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                #[inline]
                fn record_into(&self, recorder: &mut FingerprintRecorder) {
                    recorder.combine_bytes(&self.to_le_bytes());
                }
            }
        )*
    };
}

record_scalar!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Record for usize {
    #[inline]
    #[expect(clippy::as_conversions, reason = "usize is at most 64 bits wide")]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        // recorded as `u64` so 32-bit and 64-bit hosts agree
        (*self as u64).record_into(recorder);
    }
}

impl Record for bool {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        u8::from(*self).record_into(recorder);
    }
}

impl Record for FingerprintKey {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        recorder.combine(self.0);
    }
}

impl<T: Record> Record for [T] {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        self.len().record_into(recorder);
        for element in self {
            element.record_into(recorder);
        }
    }
}

impl<T: Record, const N: usize> Record for [T; N] {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        self.as_slice().record_into(recorder);
    }
}

impl<T: Record> Record for Vec<T> {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        self.as_slice().record_into(recorder);
    }
}

impl Record for str {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        self.as_bytes().record_into(recorder);
    }
}

impl Record for String {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        self.as_str().record_into(recorder);
    }
}

impl<T: Record> Record for Option<T> {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        match self {
            Some(value) => {
                true.record_into(recorder);
                value.record_into(recorder);
            }
            None => false.record_into(recorder),
        }
    }
}

/// Memoized fingerprint of a [`RecordedObject`].
///
/// Empty until the object is first fingerprinted; immutable afterwards.
#[derive(Debug, Default, Clone)]
pub struct RecordedKey(OnceLock<FingerprintKey>);

impl RecordedKey {
    /// Creates an empty key slot.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(OnceLock::new())
    }

    /// Returns the memoized key, if the object was fingerprinted already.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<FingerprintKey> {
        self.0.get().copied()
    }
}

/// An object that can fingerprint itself so it can be looked up in a cache.
///
/// Blueprints, lightweight stand-ins built only for lookups, implement this
/// trait as well; they are fingerprinted but never stored.
pub trait RecordedObject {
    /// Records the defining fields of `self`, always in the same order.
    fn fingerprint(&self, recorder: &mut FingerprintRecorder);

    /// Returns the slot memoizing the fingerprint of `self`.
    fn recorded_key(&self) -> &RecordedKey;

    /// Returns the fingerprint of `self`, computing it on first use.
    #[inline]
    fn fingerprint_key(&self) -> FingerprintKey {
        *self.recorded_key().0.get_or_init(|| {
            let mut recorder = FingerprintRecorder::new();
            self.fingerprint(&mut recorder);
            log::trace!("computed fingerprint {}", recorder.key());
            recorder.key()
        })
    }
}

#[cfg(test)]
mod test {
    use core::cell::Cell;

    use super::*;

    struct Attachments {
        formats: Vec<u32>,
        sample_count: u32,
        recorded: RecordedKey,
        walks: Cell<u32>,
    }

    impl Attachments {
        fn new(formats: Vec<u32>, sample_count: u32) -> Self {
            Self {
                formats,
                sample_count,
                recorded: RecordedKey::new(),
                walks: Cell::new(0),
            }
        }
    }

    impl RecordedObject for Attachments {
        fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
            self.walks.set(self.walks.get() + 1);
            recorder.record(&self.formats).record(&self.sample_count);
        }

        fn recorded_key(&self) -> &RecordedKey {
            &self.recorded
        }
    }

    struct Pass<'a> {
        attachments: &'a Attachments,
        label: String,
        recorded: RecordedKey,
    }

    impl RecordedObject for Pass<'_> {
        fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
            recorder.record_object(self.attachments).record(&self.label);
        }

        fn recorded_key(&self) -> &RecordedKey {
            &self.recorded
        }
    }

    #[test_log::test]
    fn identical_fields_give_identical_fingerprints() {
        let first = Attachments::new(vec![1, 2], 4);
        let second = Attachments::new(vec![1, 2], 4);
        assert_eq!(first.fingerprint_key(), second.fingerprint_key());
    }

    #[test_log::test]
    fn any_changed_field_changes_the_fingerprint() {
        let base = Attachments::new(vec![1, 2], 4);
        let other_format = Attachments::new(vec![1, 3], 4);
        let other_samples = Attachments::new(vec![1, 2], 1);
        assert_ne!(base.fingerprint_key(), other_format.fingerprint_key());
        assert_ne!(base.fingerprint_key(), other_samples.fingerprint_key());
    }

    #[test_log::test]
    fn sequences_are_order_sensitive() {
        let forward = Attachments::new(vec![1, 2], 4);
        let backward = Attachments::new(vec![2, 1], 4);
        assert_ne!(forward.fingerprint_key(), backward.fingerprint_key());
    }

    #[test_log::test]
    fn string_boundaries_matter() {
        let mut split_late = FingerprintRecorder::new();
        split_late.record("ab").record("c");
        let mut split_early = FingerprintRecorder::new();
        split_early.record("a").record("bc");
        assert_ne!(split_late.key(), split_early.key());
    }

    #[test_log::test]
    fn fingerprint_is_computed_once() {
        let attachments = Attachments::new(vec![7], 1);
        assert_eq!(attachments.recorded_key().get(), None);
        let key = attachments.fingerprint_key();
        assert_eq!(attachments.fingerprint_key(), key);
        assert_eq!(attachments.recorded_key().get(), Some(key));
        assert_eq!(attachments.walks.get(), 1);
    }

    #[test_log::test]
    fn nested_objects_are_memoized() {
        let attachments = Attachments::new(vec![7, 8], 1);
        let first = Pass {
            attachments: &attachments,
            label: "first".to_owned(),
            recorded: RecordedKey::new(),
        };
        let second = Pass {
            attachments: &attachments,
            label: "second".to_owned(),
            recorded: RecordedKey::new(),
        };
        assert_ne!(first.fingerprint_key(), second.fingerprint_key());
        assert_eq!(attachments.walks.get(), 1);

        // a nested object gets the same key as when fingerprinted on its own
        let standalone = Attachments::new(vec![7, 8], 1);
        assert_eq!(standalone.fingerprint_key(), attachments.fingerprint_key());
    }

    #[test_log::test]
    fn options_record_presence() {
        let mut none = FingerprintRecorder::new();
        none.record(&None::<u32>);
        let mut zero = FingerprintRecorder::new();
        zero.record(&Some(0_u32));
        assert_ne!(none.key(), zero.key());
    }
}
