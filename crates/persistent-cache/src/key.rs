//! Byte-exact keys of the persistent store.
//!
//! A [`PersistentCacheKey`] is content-addressed: it is the concatenation of
//! every field that affects the cached value. Its layout is the only schema
//! that has to stay bit-for-bit stable for a store to be reused across runs.

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use core::{
    fmt::{self, Display},
    mem,
};
use std::io::Write as _;

/// An ordered sequence of bytes identifying one entry of the persistent store.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistentCacheKey(Vec<u8>);

impl PersistentCacheKey {
    /// Starts building a new key.
    #[inline]
    #[must_use]
    pub fn builder() -> KeyBuilder {
        KeyBuilder::default()
    }

    /// Returns the raw key bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the key in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the key has no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for PersistentCacheKey {
    #[inline]
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for PersistentCacheKey {
    #[inline]
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for PersistentCacheKey {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for PersistentCacheKey {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        String::from_utf8_lossy(&self.0).fmt(f)
    }
}

/// Concatenates fields into a [`PersistentCacheKey`].
///
/// Numbers are written as lower-case hex or decimal text without separators,
/// so `hex(0x10de).hex(0x1f08)` produces the bytes of `"10de1f08"`. Fields
/// of variable width are only unambiguous when their boundaries are fixed by
/// [`padded_hex`](Self::padded_hex) or a preceding [`length`](Self::length).
#[derive(Debug, Default, Clone)]
#[must_use]
pub struct KeyBuilder {
    /// Accumulated key bytes.
    buffer: Vec<u8>,
}

impl KeyBuilder {
    /// Appends `value` as lower-case hex.
    #[inline]
    pub fn hex<V: fmt::LowerHex>(mut self, value: V) -> Self {
        // writing into a `Vec` cannot fail
        let _ignored = write!(self.buffer, "{value:x}");
        self
    }

    /// Appends `value` as lower-case hex, zero-padded to two digits per byte
    /// of `V`.
    #[inline]
    pub fn padded_hex<V: fmt::LowerHex>(mut self, value: V) -> Self {
        let width = mem::size_of::<V>().saturating_mul(2);
        let _ignored = write!(self.buffer, "{value:0width$x}");
        self
    }

    /// Appends a length as 16 hex digits, independent of the host's `usize`.
    #[inline]
    pub fn length(mut self, len: usize) -> Self {
        let _ignored = write!(self.buffer, "{len:016x}");
        self
    }

    /// Appends `value` as decimal.
    #[inline]
    pub fn decimal<V: Display>(mut self, value: V) -> Self {
        let _ignored = write!(self.buffer, "{value}");
        self
    }

    /// Appends a string verbatim.
    #[inline]
    pub fn str(mut self, value: &str) -> Self {
        self.buffer.extend_from_slice(value.as_bytes());
        self
    }

    /// Appends raw bytes verbatim.
    #[inline]
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Finishes the key.
    #[inline]
    #[must_use]
    pub fn build(self) -> PersistentCacheKey {
        PersistentCacheKey(self.buffer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn hex_fields_are_concatenated_without_separators() {
        let key = PersistentCacheKey::builder()
            .hex(0x1f08_u32)
            .hex(0x10de_u32)
            .hex(0xab_u8)
            .build();
        assert_eq!(key.as_bytes(), b"1f0810deab");
    }

    #[test_log::test]
    fn mixed_fields_keep_their_order() {
        let key = PersistentCacheKey::builder()
            .str("fn main() {}")
            .hex(0x0723_0203_u32)
            .decimal(2_u32)
            .str("write1")
            .build();
        assert_eq!(key.to_string(), "fn main() {}72302032write1");
    }

    #[test_log::test]
    fn raw_bytes_chain_like_other_fields() {
        let key = PersistentCacheKey::builder()
            .str("a")
            .bytes(&[0xff, 0x00])
            .hex(0xb_u8)
            .build();
        assert_eq!(key.as_bytes(), &[b'a', 0xff, 0x00, b'b']);
        assert_eq!(key.len(), 4);
    }

    #[test_log::test]
    fn padded_fields_have_fixed_width() {
        let key = PersistentCacheKey::builder()
            .padded_hex(0x1_u32)
            .padded_hex(0x23_u8)
            .length(5)
            .build();
        assert_eq!(key.to_string(), "00000001230000000000000005");
        assert_ne!(
            PersistentCacheKey::builder().padded_hex(0x1_u32).padded_hex(0x23_u32).build(),
            PersistentCacheKey::builder().padded_hex(0x12_u32).padded_hex(0x3_u32).build()
        );
    }
}
