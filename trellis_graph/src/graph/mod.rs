// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The graph: component storage and the structural API.

mod connections;
mod dirty;
mod hierarchy;

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use trellis_context::Value;
use trellis_dirty::DirtyGraph;

use crate::config::CacheConfig;
use crate::error::GraphError;
use crate::eval::{ComputeCache, HashCache};
use crate::events::GraphSignals;
use crate::ids::{ComponentId, NodeId, PlugId};
use crate::monitor::Monitor;
use crate::node::{Container, NodeKind};
use crate::plug::{Direction, PlugFlags, PlugType};

pub use dirty::DirtyPropagationScope;

pub(crate) struct Component {
    pub(crate) name: Arc<str>,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) children: Vec<ComponentId>,
    pub(crate) data: ComponentData,
}

pub(crate) enum ComponentData {
    Node(NodeData),
    Plug(PlugData),
}

pub(crate) struct NodeData {
    pub(crate) kind: Arc<dyn NodeKind>,
}

pub(crate) struct PlugData {
    pub(crate) direction: Direction,
    pub(crate) plug_type: PlugType,
    pub(crate) flags: PlugFlags,
    /// `None` only for compounds.
    pub(crate) default: Option<Value>,
    /// Static value overriding the default.
    pub(crate) value: Option<Value>,
    pub(crate) input: Option<PlugId>,
    pub(crate) outputs: SmallVec<[PlugId; 4]>,
}

struct Slot {
    generation: u32,
    component: Option<Component>,
}

/// A hierarchy of nodes and plugs, their connections, and their caches.
///
/// Components live in an arena and are addressed by generational ids.
/// Ownership is strictly tree-shaped: a component is owned by its parent's
/// child list, and its parent link is a lookup-only id. Removing a component
/// destroys its whole subtree.
///
/// Structural edits take `&mut self`. Evaluation goes through
/// [`SharedGraph`](crate::SharedGraph), which shares the graph between the
/// threads that evaluate it.
///
/// # Example
///
/// ```
/// use trellis_graph::{Container, Graph, PlugDescriptor, PlugType};
///
/// let mut graph = Graph::new();
/// let root = graph.root();
/// let a = graph.add_node(root, "node", Container).unwrap();
/// let b = graph.add_node(root, "node", Container).unwrap();
/// assert_eq!(graph.name(b.into()).unwrap(), "node1");
///
/// let plug = graph
///     .add_plug(a.into(), PlugDescriptor::input("size", PlugType::Float))
///     .unwrap();
/// assert_eq!(graph.full_name(plug.into()).unwrap(), "node.size");
/// ```
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    pub(crate) dependencies: DirtyGraph<PlugId>,
    propagation: dirty::Propagation,
    signals: GraphSignals,
    config: CacheConfig,
    pub(crate) hash_cache: HashCache,
    pub(crate) compute_cache: ComputeCache,
    pub(crate) monitors: Vec<Arc<dyn Monitor>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("components", &(self.slots.len() - self.free.len()))
            .field("edges", &self.dependencies.edge_count())
            .field("config", &self.config)
            .field("monitors", &self.monitors.len())
            .finish_non_exhaustive()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates a graph holding only its root node, with default cache limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a graph with the given cache limits.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        let mut graph = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId(ComponentId::new(0, 1)),
            dependencies: DirtyGraph::new(),
            propagation: dirty::Propagation::default(),
            signals: GraphSignals::default(),
            config,
            hash_cache: HashCache::new(config.hash_cache_size_limit()),
            compute_cache: ComputeCache::new(config.compute_memory_limit()),
            monitors: Vec::new(),
        };
        graph.root = NodeId(graph.allocate(Component {
            name: Arc::from("root"),
            parent: None,
            children: Vec::new(),
            data: ComponentData::Node(NodeData {
                kind: Arc::new(Container),
            }),
        }));
        graph
    }

    /// The root node. It cannot be removed and holds no plugs.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Signals for observing structural and dirty-state changes.
    #[must_use]
    pub fn signals(&self) -> &GraphSignals {
        &self.signals
    }

    /// Current cache limits.
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        self.config
    }

    /// Changes the compute cache budget, evicting as needed.
    pub fn set_compute_cache_memory_limit(&mut self, bytes: usize) {
        self.config = self.config.with_compute_memory_limit(bytes);
        self.compute_cache.set_memory_limit(bytes);
    }

    /// Changes the hash cache capacity, evicting as needed.
    pub fn set_hash_cache_size_limit(&mut self, entries: usize) {
        self.config = self.config.with_hash_cache_size_limit(entries);
        self.hash_cache.set_capacity(entries);
    }

    /// Approximate memory held by computed values.
    #[must_use]
    pub fn compute_cache_memory_usage(&self) -> usize {
        self.compute_cache.memory_usage()
    }

    /// Drops every computed value not currently being computed.
    pub fn clear_compute_cache(&self) {
        self.compute_cache.clear();
    }

    /// Forgets every remembered hash.
    pub fn clear_hash_cache(&self) {
        self.hash_cache.clear();
    }

    /// Installs a monitor that observes every hash and compute process.
    ///
    /// Remembered hashes are forgotten so the monitor sees each output
    /// hashed before it is computed.
    pub fn add_monitor(&mut self, monitor: Arc<dyn Monitor>) {
        self.hash_cache.clear();
        self.monitors.push(monitor);
    }

    /// Removes a monitor previously added. Returns `false` if it was not
    /// installed.
    pub fn remove_monitor(&mut self, monitor: &Arc<dyn Monitor>) -> bool {
        let before = self.monitors.len();
        self.monitors.retain(|m| !Arc::ptr_eq(m, monitor));
        self.monitors.len() != before
    }

    // --- storage ---

    fn allocate(&mut self, component: Component) -> ComponentId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.component = Some(component);
            ComponentId::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 1,
                component: Some(component),
            });
            ComponentId::new(index, 1)
        }
    }

    fn release(&mut self, id: ComponentId) {
        if let Some(slot) = self.slots.get_mut(id.slot())
            && slot.generation == id.generation()
            && slot.component.take().is_some()
        {
            slot.generation = slot.generation.wrapping_add(1);
            #[expect(clippy::cast_possible_truncation, reason = "slot indices come from u32")]
            self.free.push(id.slot() as u32);
        }
    }

    pub(crate) fn component(&self, id: ComponentId) -> Result<&Component, GraphError> {
        self.slots
            .get(id.slot())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.component.as_ref())
            .ok_or(GraphError::StaleId(id))
    }

    pub(crate) fn component_mut(&mut self, id: ComponentId) -> Result<&mut Component, GraphError> {
        self.slots
            .get_mut(id.slot())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.component.as_mut())
            .ok_or(GraphError::StaleId(id))
    }

    pub(crate) fn plug_data(&self, plug: PlugId) -> Result<&PlugData, GraphError> {
        match &self.component(plug.0)?.data {
            ComponentData::Plug(data) => Ok(data),
            ComponentData::Node(_) => Err(GraphError::WrongKind {
                id: plug.0,
                expected: "plug",
            }),
        }
    }

    pub(crate) fn plug_data_mut(&mut self, plug: PlugId) -> Result<&mut PlugData, GraphError> {
        match &mut self.component_mut(plug.0)?.data {
            ComponentData::Plug(data) => Ok(data),
            ComponentData::Node(_) => Err(GraphError::WrongKind {
                id: plug.0,
                expected: "plug",
            }),
        }
    }

    pub(crate) fn node_kind(&self, node: NodeId) -> Result<&Arc<dyn NodeKind>, GraphError> {
        match &self.component(node.0)?.data {
            ComponentData::Node(data) => Ok(&data.kind),
            ComponentData::Plug(_) => Err(GraphError::WrongKind {
                id: node.0,
                expected: "node",
            }),
        }
    }

    /// Returns `true` if `id` refers to a live component.
    #[must_use]
    pub fn is_alive(&self, id: ComponentId) -> bool {
        self.component(id).is_ok()
    }

    /// Returns the node `id` refers to, if it is a live node.
    #[must_use]
    pub fn as_node(&self, id: ComponentId) -> Option<NodeId> {
        matches!(self.component(id).ok()?.data, ComponentData::Node(_)).then_some(NodeId(id))
    }

    /// Returns the plug `id` refers to, if it is a live plug.
    #[must_use]
    pub fn as_plug(&self, id: ComponentId) -> Option<PlugId> {
        matches!(self.component(id).ok()?.data, ComponentData::Plug(_)).then_some(PlugId(id))
    }

    /// The kind's [`type_name`](NodeKind::type_name).
    pub fn type_name(&self, node: NodeId) -> Result<&'static str, GraphError> {
        Ok(self.node_kind(node)?.type_name())
    }

    /// The node's kind.
    pub fn kind(&self, node: NodeId) -> Result<Arc<dyn NodeKind>, GraphError> {
        self.node_kind(node).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plug::PlugDescriptor;

    #[test]
    fn removed_ids_go_stale_and_slots_are_reused() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = graph.add_node(root, "a", Container).unwrap();
        graph.remove_child(root.into(), a.into()).unwrap();
        assert!(!graph.is_alive(a.into()));
        assert_eq!(graph.name(a.into()), Err(GraphError::StaleId(a.into())));

        let b = graph.add_node(root, "b", Container).unwrap();
        assert_eq!(b.0.slot(), a.0.slot());
        assert_ne!(b, a);
        assert!(graph.is_alive(b.into()));
    }

    #[test]
    fn kind_checks() {
        let mut graph = Graph::new();
        let root = graph.root();
        let n = graph.add_node(root, "n", Container).unwrap();
        let p = graph
            .add_plug(n.into(), PlugDescriptor::input("p", PlugType::Int))
            .unwrap();
        assert_eq!(graph.as_node(n.into()), Some(n));
        assert_eq!(graph.as_plug(n.into()), None);
        assert_eq!(graph.as_plug(p.into()), Some(p));
        assert_eq!(graph.type_name(n).unwrap(), "Container");
        assert!(matches!(
            graph.type_name(NodeId(p.into())),
            Err(GraphError::WrongKind { expected: "node", .. })
        ));
    }
}
