// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use alloc::collections::VecDeque;
use core::hash::Hash;

use hashbrown::HashSet;

/// Reusable buffers for breadth-first walks over a [`DirtyGraph`].
///
/// Keeping one across waves avoids reallocating the queue and the visited
/// set each time.
///
/// [`DirtyGraph`]: crate::DirtyGraph
#[derive(Clone, Debug)]
pub struct TraversalScratch<K> {
    queue: VecDeque<K>,
    visited: HashSet<K>,
}

impl<K> Default for TraversalScratch<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            visited: HashSet::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> TraversalScratch<K> {
    /// Empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers sized for walks of about `capacity` keys.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            visited: HashSet::with_capacity(capacity),
        }
    }

    /// Clears the buffers and queues `root` as visited.
    pub(crate) fn start(&mut self, root: K) {
        self.queue.clear();
        self.visited.clear();
        self.visit(root);
    }

    /// Queues `key` unless it was already visited. Returns `true` if queued.
    pub(crate) fn visit(&mut self, key: K) -> bool {
        let fresh = self.visited.insert(key);
        if fresh {
            self.queue.push_back(key);
        }
        fresh
    }

    /// The next queued key.
    pub(crate) fn next(&mut self) -> Option<K> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restarting_forgets_the_previous_walk() {
        let mut scratch = TraversalScratch::<u32>::with_capacity(4);
        scratch.start(1);
        assert!(scratch.visit(2));
        assert!(!scratch.visit(1));
        assert_eq!(scratch.next(), Some(1));

        scratch.start(2);
        assert_eq!(scratch.next(), Some(2));
        assert_eq!(scratch.next(), None);
        assert!(scratch.visit(1));
    }
}
