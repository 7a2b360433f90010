// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bidirectional "depends on" edges.

use alloc::vec::Vec;
use core::fmt;
use core::hash::Hash;

use hashbrown::HashSet;

use crate::scratch::TraversalScratch;

/// Keys stored by dense index.
///
/// Edges live in a vector indexed by [`DenseKey::index`], so keys should be
/// small integers or arena slots. Two live keys must never share an index.
pub trait DenseKey {
    /// The storage index of this key.
    fn index(self) -> usize;
}

impl DenseKey for u32 {
    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// An edge refused because it would close a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleError<K> {
    /// The key that was to depend on `to`.
    pub from: K,
    /// The key `from` was to depend on.
    pub to: K,
}

impl<K: fmt::Debug> fmt::Display for CycleError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} depending on {:?} would form a cycle", self.from, self.to)
    }
}

impl<K: fmt::Debug> core::error::Error for CycleError<K> {}

/// What [`DirtyGraph::add_dependency`] does with an edge that closes a cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CycleHandling {
    /// Refuse the edge with a [`CycleError`].
    Error,
    /// Drop the edge without an error.
    Ignore,
    /// Add the edge without searching for a cycle. Only for edges known to
    /// be acyclic, such as ones being restored.
    Allow,
}

#[derive(Clone, Debug)]
struct Edges<K> {
    /// Keys this key depends on.
    upstream: Vec<K>,
    /// Keys depending on this key.
    downstream: Vec<K>,
}

impl<K> Default for Edges<K> {
    fn default() -> Self {
        Self {
            upstream: Vec::new(),
            downstream: Vec::new(),
        }
    }
}

fn remove_item<K: PartialEq>(list: &mut Vec<K>, item: K) -> bool {
    match list.iter().position(|k| *k == item) {
        Some(pos) => {
            list.swap_remove(pos);
            true
        }
        None => false,
    }
}

/// Dependency edges between keys, queryable in both directions.
///
/// The plug graph records two kinds of edge here: a connected input depends
/// on its upstream output, and an output depends on every input of its node
/// that affects it.
///
/// ```
/// use trellis_dirty::{CycleHandling, DirtyGraph};
///
/// let mut graph = DirtyGraph::<u32>::new();
/// graph.add_dependency(2, 1, CycleHandling::Error).unwrap();
/// graph.add_dependency(3, 2, CycleHandling::Error).unwrap();
///
/// assert_eq!(graph.dependencies(2).collect::<Vec<_>>(), [1]);
/// assert_eq!(graph.dependents(2).collect::<Vec<_>>(), [3]);
/// assert!(graph.would_create_cycle(1, 3));
/// ```
#[derive(Clone, Debug)]
pub struct DirtyGraph<K> {
    keys: Vec<Edges<K>>,
    edges: usize,
}

impl<K> Default for DirtyGraph<K> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            edges: 0,
        }
    }
}

impl<K> DirtyGraph<K>
where
    K: Copy + Eq + Hash + DenseKey,
{
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges
    }

    /// Returns `true` if there are no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges == 0
    }

    fn edges_of(&self, key: K) -> Option<&Edges<K>> {
        self.keys.get(key.index())
    }

    fn edges_of_mut(&mut self, key: K) -> &mut Edges<K> {
        let index = key.index();
        if index >= self.keys.len() {
            self.keys.resize_with(index + 1, Edges::default);
        }
        &mut self.keys[index]
    }

    /// Makes `from` depend on `to`, so dirtying `to` dirties `from`.
    ///
    /// Returns `Ok(false)` if the edge already existed or a cycle was
    /// ignored. A key never depends on itself, whatever `handling` says.
    pub fn add_dependency(
        &mut self,
        from: K,
        to: K,
        handling: CycleHandling,
    ) -> Result<bool, CycleError<K>> {
        if from == to || (handling != CycleHandling::Allow && self.would_create_cycle(from, to)) {
            return match handling {
                CycleHandling::Error => Err(CycleError { from, to }),
                CycleHandling::Ignore | CycleHandling::Allow => Ok(false),
            };
        }
        if self.dependencies(from).any(|k| k == to) {
            return Ok(false);
        }
        self.edges_of_mut(from).upstream.push(to);
        self.edges_of_mut(to).downstream.push(from);
        self.edges += 1;
        Ok(true)
    }

    /// Removes the edge `from` depends on `to`. Returns `false` if there was
    /// none.
    pub fn remove_dependency(&mut self, from: K, to: K) -> bool {
        let Some(edges) = self.keys.get_mut(from.index()) else {
            return false;
        };
        if !remove_item(&mut edges.upstream, to) {
            return false;
        }
        if let Some(edges) = self.keys.get_mut(to.index()) {
            remove_item(&mut edges.downstream, from);
        }
        self.edges -= 1;
        true
    }

    /// Returns `true` if `to` already depends on `from`, directly or not, so
    /// that `from -> to` would close a cycle.
    #[must_use]
    pub fn would_create_cycle(&self, from: K, to: K) -> bool {
        let mut seen = HashSet::new();
        let mut stack = alloc::vec![to];
        while let Some(key) = stack.pop() {
            if key == from {
                return true;
            }
            if seen.insert(key) {
                stack.extend(self.dependencies(key));
            }
        }
        false
    }

    /// Makes `to` the exact set of keys `from` depends on.
    ///
    /// Returns `Ok(false)` if the set was already `to`. On a cycle error the
    /// previous set is restored.
    pub fn replace_dependencies(
        &mut self,
        from: K,
        to: impl IntoIterator<Item = K>,
        handling: CycleHandling,
    ) -> Result<bool, CycleError<K>> {
        let mut wanted: Vec<K> = Vec::new();
        for key in to {
            if !wanted.contains(&key) {
                wanted.push(key);
            }
        }
        let current: Vec<K> = self.dependencies(from).collect();
        if current.len() == wanted.len() && current.iter().all(|k| wanted.contains(k)) {
            return Ok(false);
        }

        // Cycle checks must not see the edges being replaced.
        for &dep in &current {
            self.remove_dependency(from, dep);
        }
        for &dep in &wanted {
            if let Err(err) = self.add_dependency(from, dep, handling) {
                for &dep in &wanted {
                    self.remove_dependency(from, dep);
                }
                for &dep in &current {
                    let _ = self.add_dependency(from, dep, CycleHandling::Allow);
                }
                return Err(err);
            }
        }
        Ok(true)
    }

    /// Drops every edge touching `key`. Call before its index is reused.
    pub fn remove_key(&mut self, key: K) {
        let Some(edges) = self.keys.get_mut(key.index()) else {
            return;
        };
        let upstream = core::mem::take(&mut edges.upstream);
        let downstream = core::mem::take(&mut edges.downstream);
        self.edges -= upstream.len() + downstream.len();
        for up in upstream {
            if let Some(edges) = self.keys.get_mut(up.index()) {
                remove_item(&mut edges.downstream, key);
            }
        }
        for down in downstream {
            if let Some(edges) = self.keys.get_mut(down.index()) {
                remove_item(&mut edges.upstream, key);
            }
        }
    }

    /// Keys `key` depends on, in no particular order.
    pub fn dependencies(&self, key: K) -> impl Iterator<Item = K> + '_ {
        self.edges_of(key)
            .map_or(&[][..], |e| e.upstream.as_slice())
            .iter()
            .copied()
    }

    /// Keys depending on `key`, in no particular order.
    pub fn dependents(&self, key: K) -> impl Iterator<Item = K> + '_ {
        self.edges_of(key)
            .map_or(&[][..], |e| e.downstream.as_slice())
            .iter()
            .copied()
    }

    /// Returns `true` if `key` depends on anything.
    #[must_use]
    pub fn has_dependencies(&self, key: K) -> bool {
        self.edges_of(key).is_some_and(|e| !e.upstream.is_empty())
    }

    /// Walks everything that transitively depends on `key`, breadth-first.
    ///
    /// `f` receives each key once, with the key it was reached from.
    pub fn for_each_transitive_dependent(
        &self,
        key: K,
        scratch: &mut TraversalScratch<K>,
        mut f: impl FnMut(K, K),
    ) {
        scratch.start(key);
        while let Some(current) = scratch.next() {
            for next in self.dependents(current) {
                if scratch.visit(next) {
                    f(next, current);
                }
            }
        }
    }
}
