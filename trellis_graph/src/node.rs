// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node behavior: the per-kind capabilities the graph dispatches to.

use trellis_context::{ContentHasher, Value};

use crate::error::{ComputeError, EvalError};
use crate::eval::Process;
use crate::graph::Graph;
use crate::ids::{ComponentId, NodeId, PlugId};
use crate::plug::PlugDescriptor;

/// How results for an output are cached.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum CachePolicy {
    /// Never cached; every request runs the process.
    Uncached,
    /// Cached; concurrent requests for the same key wait for the first.
    #[default]
    Standard,
    /// Cached; the process spawns subtasks and concurrent requests for the
    /// same key help run them instead of waiting idle.
    Collaborative,
}

/// The behavior of one kind of node.
///
/// A kind is shared by every node created from it, so per-node state lives
/// in plugs, never in the kind. The graph passes itself and the relevant ids
/// to every callback.
///
/// Every method has a default: a kind that overrides nothing is a plain
/// container that accepts any relationship and computes nothing.
pub trait NodeKind: Send + Sync + 'static {
    /// A name for the kind, used in hashes, errors and logs.
    fn type_name(&self) -> &'static str;

    /// Plugs created with every node of this kind.
    fn plugs(&self) -> Vec<PlugDescriptor> {
        Vec::new()
    }

    /// Pushes the outputs of `node` that directly depend on `input`.
    ///
    /// Must be a pure function of the graph's structure. It is called again
    /// whenever plugs are added to or removed from the node.
    fn affects(&self, graph: &Graph, node: NodeId, input: PlugId, outputs: &mut Vec<PlugId>) {
        let _ = (graph, node, input, outputs);
    }

    /// Whether `plug` may be connected to `upstream`.
    fn accepts_input(&self, graph: &Graph, plug: PlugId, upstream: PlugId) -> bool {
        let _ = (graph, plug, upstream);
        true
    }

    /// Whether `node` may take `child` as a child.
    fn accepts_child(&self, graph: &Graph, node: NodeId, child: ComponentId) -> bool {
        let _ = (graph, node, child);
        true
    }

    /// Whether `node` may be parented to `parent`.
    fn accepts_parent(&self, graph: &Graph, node: NodeId, parent: ComponentId) -> bool {
        let _ = (graph, node, parent);
        true
    }

    /// The compute capability, for kinds whose outputs are computed.
    ///
    /// Outputs of kinds returning `None` hold their default value.
    fn as_compute(&self) -> Option<&dyn ComputeNode> {
        None
    }
}

/// Hash and compute for the outputs of a node kind.
///
/// The contract: whenever `hash` produces the same result, `compute` must
/// produce the same value. `hash` therefore appends everything `compute`
/// depends on: upstream hashes through [`Process::hash_of`], and any context
/// variable `compute` reads.
///
/// `hash` is called for every request, `compute` only on a cache miss.
pub trait ComputeNode: Send + Sync {
    /// Appends everything the value of `process.plug()` depends on.
    ///
    /// The default appends nothing, which makes evaluation fail with
    /// [`ComputeError::HashNotImplemented`].
    fn hash(&self, process: &Process<'_>, hasher: &mut ContentHasher) -> Result<(), EvalError> {
        let _ = (process, hasher);
        Ok(())
    }

    /// Computes the value of `process.plug()`.
    fn compute(&self, process: &Process<'_>) -> Result<Value, EvalError> {
        Err(ComputeError::ComputeNotImplemented {
            plug: process.plug_name(),
            node_type: process.node_type(),
        }
        .into())
    }

    /// Caching of computed values for `output`.
    fn compute_cache_policy(&self, output: PlugId) -> CachePolicy {
        let _ = output;
        CachePolicy::Standard
    }

    /// Caching of hashes for `output`.
    ///
    /// [`CachePolicy::Collaborative`] is treated as `Standard`: hashes are
    /// never computed collaboratively.
    fn hash_cache_policy(&self, output: PlugId) -> CachePolicy {
        let _ = output;
        CachePolicy::Standard
    }
}

/// A node kind with no plugs and no behavior, used for grouping.
///
/// The root of every graph is a `Container`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Container;

impl NodeKind for Container {
    fn type_name(&self) -> &'static str {
        "Container"
    }
}
