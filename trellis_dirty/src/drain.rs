// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Upstream-first ordering of a dirty wave.

use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::hash::Hash;

use hashbrown::HashMap;

use crate::graph::{DenseKey, DirtyGraph};
use crate::set::DirtySet;

/// How a drain ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrainCompletion {
    /// Every key was yielded.
    Complete,
    /// Keys on a cycle could never become ready.
    Stalled {
        /// Number of keys not yielded.
        remaining: usize,
    },
}

/// Yields a set of keys so that each comes after every one of its
/// dependencies that is also in the set.
///
/// Among keys ready at the same time the smallest comes first, so the order
/// depends only on the keys and the edges. Keys on a cycle are never
/// yielded. Check [`completion`](Self::completion) once the iterator is
/// exhausted.
///
/// ```
/// use trellis_dirty::{CycleHandling, DirtyGraph, DrainSortedDeterministic};
///
/// let mut graph = DirtyGraph::<u32>::new();
/// graph.add_dependency(1, 7, CycleHandling::Error).unwrap();
///
/// let order: Vec<_> = DrainSortedDeterministic::from_keys([1, 7, 3], &graph).collect();
/// assert_eq!(order, [3, 7, 1]);
/// ```
#[derive(Debug)]
pub struct DrainSortedDeterministic<'a, K> {
    graph: &'a DirtyGraph<K>,
    ready: BinaryHeap<Reverse<K>>,
    /// Unyielded keys, with how many of their dependencies are still
    /// waiting to be yielded.
    waiting_on: HashMap<K, usize>,
}

impl<'a, K> DrainSortedDeterministic<'a, K>
where
    K: Copy + Ord + Hash + DenseKey,
{
    /// Orders `keys`, ignoring duplicates.
    pub fn from_keys(keys: impl IntoIterator<Item = K>, graph: &'a DirtyGraph<K>) -> Self {
        let mut waiting_on: HashMap<K, usize> = keys.into_iter().map(|k| (k, 0)).collect();
        let members: Vec<K> = waiting_on.keys().copied().collect();
        for key in members {
            let count = graph
                .dependencies(key)
                .filter(|dep| waiting_on.contains_key(dep))
                .count();
            waiting_on.insert(key, count);
        }
        let ready = waiting_on
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&key, _)| Reverse(key))
            .collect();
        Self {
            graph,
            ready,
            waiting_on,
        }
    }

    /// How the drain ended. Only meaningful once the iterator is exhausted.
    #[must_use]
    pub fn completion(&self) -> DrainCompletion {
        if self.waiting_on.is_empty() {
            DrainCompletion::Complete
        } else {
            DrainCompletion::Stalled {
                remaining: self.waiting_on.len(),
            }
        }
    }

    /// Runs the drain to the end.
    #[must_use]
    pub fn collect_with_completion(mut self) -> (Vec<K>, DrainCompletion) {
        let order = self.by_ref().collect();
        (order, self.completion())
    }
}

impl<K> Iterator for DrainSortedDeterministic<'_, K>
where
    K: Copy + Ord + Hash + DenseKey,
{
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let Reverse(key) = self.ready.pop()?;
        self.waiting_on.remove(&key);
        for dependent in self.graph.dependents(key) {
            if let Some(count) = self.waiting_on.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    self.ready.push(Reverse(dependent));
                }
            }
        }
        Some(key)
    }
}

/// Empties `dirty` into a [`DrainSortedDeterministic`].
pub fn drain_sorted_deterministic<'a, K>(
    dirty: &mut DirtySet<K>,
    graph: &'a DirtyGraph<K>,
) -> DrainSortedDeterministic<'a, K>
where
    K: Copy + Ord + Hash + DenseKey,
{
    DrainSortedDeterministic::from_keys(dirty.drain(), graph)
}
