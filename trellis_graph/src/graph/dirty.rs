// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty propagation waves.

use core::ops::{Deref, DerefMut};

use trellis_dirty::{
    DirtySet, DrainCompletion, DrainSortedDeterministic, EagerPolicy, OneParentRecorder,
    TraversalScratch,
};

use super::Graph;
use crate::ids::PlugId;

#[derive(Debug, Default)]
pub(super) struct Propagation {
    /// Open [`DirtyPropagationScope`]s.
    depth: usize,
    pending: DirtySet<PlugId>,
    scratch: TraversalScratch<PlugId>,
    trace: OneParentRecorder<PlugId>,
}

impl Propagation {
    pub(super) fn forget(&mut self, plug: PlugId) {
        self.pending.remove_key(plug);
    }
}

/// Batches dirty propagation until dropped.
///
/// While any scope is open, plugs dirtied by edits accumulate. When the
/// outermost scope closes, the accumulated plugs are notified as a single
/// wave: each plug once, upstream plugs first. Scopes nest and dereference to
/// the graph, so edits are made through them.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use trellis_graph::{Container, Graph, PlugDescriptor, PlugType};
///
/// let mut graph = Graph::new();
/// let root = graph.root();
/// let node = graph.add_node(root, "n", Container).unwrap();
/// let plug = graph
///     .add_plug(node.into(), PlugDescriptor::input("x", PlugType::Int))
///     .unwrap();
///
/// let count = Arc::new(AtomicUsize::new(0));
/// let c = count.clone();
/// let _connection = graph.signals().plug_dirtied.connect(move |_| {
///     c.fetch_add(1, Ordering::Relaxed);
/// });
///
/// {
///     let mut scope = graph.dirty_propagation_scope();
///     scope.set_value(plug, 1).unwrap();
///     scope.set_value(plug, 2).unwrap();
///     assert_eq!(count.load(Ordering::Relaxed), 0);
/// }
/// assert_eq!(count.load(Ordering::Relaxed), 1);
/// ```
#[derive(Debug)]
#[must_use = "propagation resumes as soon as the scope is dropped"]
pub struct DirtyPropagationScope<'g> {
    graph: &'g mut Graph,
}

impl Deref for DirtyPropagationScope<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        self.graph
    }
}

impl DerefMut for DirtyPropagationScope<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        self.graph
    }
}

impl Drop for DirtyPropagationScope<'_> {
    fn drop(&mut self) {
        self.graph.propagation.depth -= 1;
        if self.graph.propagation.depth == 0 {
            self.graph.flush_dirty();
        }
    }
}

impl Graph {
    /// Opens a scope that batches dirty notifications.
    pub fn dirty_propagation_scope(&mut self) -> DirtyPropagationScope<'_> {
        self.propagation.depth += 1;
        DirtyPropagationScope { graph: self }
    }

    /// Marks `plug` and everything downstream of it dirty.
    pub(crate) fn dirty(&mut self, plug: PlugId) {
        let propagation = &mut self.propagation;
        if propagation.pending.is_empty() {
            propagation.trace.clear();
        }
        EagerPolicy.propagate_with_trace(
            plug,
            &self.dependencies,
            &mut propagation.pending,
            &mut propagation.scratch,
            &mut propagation.trace,
        );
        if propagation.depth == 0 {
            self.flush_dirty();
        }
    }

    fn flush_dirty(&mut self) {
        if self.propagation.pending.is_empty() {
            return;
        }
        let mut wave: Vec<PlugId> = self.propagation.pending.drain().collect();
        // A dirty child makes every enclosing compound plug dirty as well.
        let mut compounds = Vec::new();
        for &plug in &wave {
            compounds.extend(self.ancestors(plug.0).map_while(|a| self.as_plug(a)));
        }
        wave.extend(compounds);

        self.hash_cache.clear();

        let (order, completion) =
            DrainSortedDeterministic::from_keys(wave, &self.dependencies).collect_with_completion();
        debug_assert_eq!(
            completion,
            DrainCompletion::Complete,
            "the dependency graph is acyclic"
        );
        tracing::debug!(plugs = order.len(), "dirty propagation wave");
        for plug in order {
            self.signals.plug_dirtied.emit(&plug);
        }
    }

    /// The chain of plugs through which dirtiness reached `plug` in the most
    /// recent propagation wave, starting at the plug that was edited and
    /// ending at `plug`.
    ///
    /// `None` if the last wave did not reach `plug` through the dependency
    /// graph.
    #[must_use]
    pub fn explain_dirty(&self, plug: PlugId) -> Option<Vec<PlugId>> {
        self.propagation.trace.explain_path(plug)
    }
}
