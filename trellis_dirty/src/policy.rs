// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::hash::Hash;

use crate::graph::{DenseKey, DirtyGraph};
use crate::scratch::TraversalScratch;
use crate::set::DirtySet;
use crate::trace::OneParentRecorder;

/// Marks an edited key and everything depending on it, right away.
#[derive(Copy, Clone, Debug, Default)]
pub struct EagerPolicy;

impl EagerPolicy {
    /// Marks `key` and its transitive dependents into `dirty`.
    pub fn propagate_with_scratch<K>(
        &self,
        key: K,
        graph: &DirtyGraph<K>,
        dirty: &mut DirtySet<K>,
        scratch: &mut TraversalScratch<K>,
    ) where
        K: Copy + Eq + Hash + DenseKey,
    {
        dirty.mark(key);
        graph.for_each_transitive_dependent(key, scratch, |next, _| {
            dirty.mark(next);
        });
    }

    /// Like [`propagate_with_scratch`](Self::propagate_with_scratch), also
    /// recording why each key became dirty.
    pub fn propagate_with_trace<K>(
        &self,
        key: K,
        graph: &DirtyGraph<K>,
        dirty: &mut DirtySet<K>,
        scratch: &mut TraversalScratch<K>,
        trace: &mut OneParentRecorder<K>,
    ) where
        K: Copy + Eq + Hash + DenseKey,
    {
        dirty.mark(key);
        trace.record(key, None);
        graph.for_each_transitive_dependent(key, scratch, |next, from| {
            dirty.mark(next);
            trace.record(next, Some(from));
        });
    }
}
