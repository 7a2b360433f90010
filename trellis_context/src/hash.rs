// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Content hashes.

use std::fmt;
use std::sync::Arc;

/// A 256-bit content hash.
///
/// Produced by [`ContentHasher`]. Equal hashes stand in for equal values:
/// the compute cache keys results on them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The all-zero hash, produced by nothing but [`Default`].
    pub const ZERO: Self = Self([0; 32]);

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the first eight bytes as an integer, handy in log output.
    #[must_use]
    pub fn short(&self) -> u64 {
        let mut head = [0_u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(head)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:016x})", self.short())
    }
}

/// Types that can be fed to a [`ContentHasher`].
///
/// Every implementation writes a type tag before its payload, so `1_i64` and
/// `1.0_f64` never collide, and variable-length data is length-prefixed.
pub trait Hashable {
    /// Appends `self` to `hasher`.
    fn hash_into(&self, hasher: &mut ContentHasher);
}

mod tag {
    pub(super) const BOOL: u8 = 1;
    pub(super) const INT: u8 = 2;
    pub(super) const UINT: u8 = 3;
    pub(super) const FLOAT: u8 = 4;
    pub(super) const STR: u8 = 5;
    pub(super) const HASH: u8 = 6;
    pub(super) const SLICE: u8 = 7;
}

/// Incremental builder for a [`ContentHash`].
///
/// # Example
///
/// ```
/// use trellis_context::ContentHasher;
///
/// let mut a = ContentHasher::new();
/// a.append("add").append(&1.5_f64).append(&2_i64);
///
/// let mut b = ContentHasher::new();
/// b.append("add").append(&1.5_f64).append(&2_i64);
///
/// assert_eq!(a.finish(), b.finish());
/// ```
#[derive(Clone, Debug, Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
    appended: bool,
}

impl ContentHasher {
    /// Creates a hasher with nothing appended.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value.
    pub fn append<T: Hashable + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.hash_into(self);
        self
    }

    /// Appends raw bytes preceded by `tag`.
    fn write(&mut self, tag: u8, bytes: &[u8]) {
        self.appended = true;
        self.inner.update(&[tag]);
        self.inner.update(bytes);
    }

    /// Returns `true` if nothing has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.appended
    }

    /// Returns the hash of everything appended so far.
    #[must_use]
    pub fn finish(&self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}

impl Hashable for bool {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write(tag::BOOL, &[u8::from(*self)]);
    }
}

impl Hashable for i64 {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write(tag::INT, &self.to_le_bytes());
    }
}

impl Hashable for i32 {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        i64::from(*self).hash_into(hasher);
    }
}

impl Hashable for u64 {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write(tag::UINT, &self.to_le_bytes());
    }
}

impl Hashable for u32 {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        u64::from(*self).hash_into(hasher);
    }
}

impl Hashable for usize {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        (*self as u64).hash_into(hasher);
    }
}

impl Hashable for f64 {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        // -0.0 and 0.0 compare equal, so they must hash equal.
        let bits = if *self == 0.0 { 0 } else { self.to_bits() };
        hasher.write(tag::FLOAT, &bits.to_le_bytes());
    }
}

impl Hashable for str {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write(tag::STR, &(self.len() as u64).to_le_bytes());
        hasher.inner.update(self.as_bytes());
    }
}

impl Hashable for String {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        self.as_str().hash_into(hasher);
    }
}

impl Hashable for Arc<str> {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        (**self).hash_into(hasher);
    }
}

impl Hashable for ContentHash {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write(tag::HASH, &self.0);
    }
}

impl<T: Hashable> Hashable for [T] {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write(tag::SLICE, &(self.len() as u64).to_le_bytes());
        for item in self {
            item.hash_into(hasher);
        }
    }
}

impl<T: Hashable + ?Sized> Hashable for &T {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        (**self).hash_into(hasher);
    }
}
