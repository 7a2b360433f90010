// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::hash::Hash;

use hashbrown::HashSet;
use hashbrown::hash_set::Drain;

/// Keys marked dirty and not yet drained.
#[derive(Clone, Debug)]
pub struct DirtySet<K> {
    keys: HashSet<K>,
}

impl<K> Default for DirtySet<K> {
    fn default() -> Self {
        Self {
            keys: HashSet::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> DirtySet<K> {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key`. Returns `true` if it was clean.
    pub fn mark(&mut self, key: K) -> bool {
        self.keys.insert(key)
    }

    /// Returns `true` if `key` is marked.
    #[must_use]
    pub fn is_dirty(&self, key: K) -> bool {
        self.keys.contains(&key)
    }

    /// Returns `true` if nothing is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of marked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Takes every marked key, in no particular order.
    pub fn drain(&mut self) -> Drain<'_, K> {
        self.keys.drain()
    }

    /// Forgets `key`, e.g. because it was destroyed.
    pub fn remove_key(&mut self, key: K) -> bool {
        self.keys.remove(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_is_idempotent() {
        let mut set = DirtySet::new();
        assert!(set.mark(3_u32));
        assert!(!set.mark(3));
        assert!(set.mark(5));
        assert_eq!(set.len(), 2);
        assert!(set.remove_key(5));
        assert!(!set.is_dirty(5));
        assert_eq!(set.drain().count(), 1);
        assert!(set.is_empty());
    }
}
