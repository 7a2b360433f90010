// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use alloc::vec::Vec;
use core::hash::Hash;

use hashbrown::HashMap;

/// Remembers, for each key dirtied in a wave, the key it was reached from.
///
/// Only the first cause is kept, so the recorded causes form a forest rooted
/// at the keys that were edited directly.
#[derive(Clone, Debug)]
pub struct OneParentRecorder<K> {
    /// `None` marks a key dirtied directly.
    parents: HashMap<K, Option<K>>,
}

impl<K> Default for OneParentRecorder<K> {
    fn default() -> Self {
        Self {
            parents: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> OneParentRecorder<K> {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every recorded cause.
    pub fn clear(&mut self) {
        self.parents.clear();
    }

    pub(crate) fn record(&mut self, key: K, parent: Option<K>) {
        self.parents.entry(key).or_insert(parent);
    }

    /// The key `key` was reached from, or `None` if it was edited directly or
    /// not dirtied at all.
    #[must_use]
    pub fn parent(&self, key: K) -> Option<K> {
        self.parents.get(&key).copied().flatten()
    }

    /// The chain from a directly edited key down to `key`, or `None` if
    /// `key` was not dirtied.
    #[must_use]
    pub fn explain_path(&self, key: K) -> Option<Vec<K>> {
        let mut path = alloc::vec![key];
        let mut current = *self.parents.get(&key)?;
        while let Some(parent) = current {
            if path.len() > self.parents.len() {
                return None;
            }
            path.push(parent);
            current = *self.parents.get(&parent)?;
        }
        path.reverse();
        Some(path)
    }
}
