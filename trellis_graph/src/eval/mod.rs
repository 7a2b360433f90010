// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hash-then-compute evaluation.
//!
//! Every output value is addressed by a [`ContentHash`] derived from the
//! hashes of everything it depends on. A request first hashes the plug,
//! which is cheap, then looks the hash up in the compute cache and computes
//! only on a miss. Contexts in which a plug hashes alike share one cache
//! entry for it.

mod compute_cache;
mod hash_cache;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use trellis_context::{ContentHash, ContentHasher, Context, Value, record_reads};
use trellis_task_mutex::TaskGroup;

use crate::error::{ComputeError, EvalError, GraphError};
use crate::graph::Graph;
use crate::ids::{NodeId, PlugId};
use crate::monitor::{ProcessInfo, ProcessType};
use crate::node::{CachePolicy, ComputeNode, NodeKind};
use crate::plug::{Direction, PlugFlags, PlugType};

pub(crate) use compute_cache::ComputeCache;
pub(crate) use hash_cache::HashCache;

/// A graph shared between the threads that evaluate it.
///
/// Evaluation holds a read lock for its whole duration, so any number of
/// threads evaluate at once, and edits through [`write`](Self::write) wait
/// for them to finish. Cloning is cheap and yields a handle to the same
/// graph.
///
/// ```
/// use trellis_graph::{Container, Graph, PlugDescriptor, PlugType, SharedGraph};
///
/// let mut graph = Graph::new();
/// let root = graph.root();
/// let node = graph.add_node(root, "n", Container).unwrap();
/// let size = graph
///     .add_plug(node.into(), PlugDescriptor::input("size", PlugType::Float))
///     .unwrap();
///
/// let shared = SharedGraph::new(graph);
/// shared.write().set_value(size, 2.5).unwrap();
/// assert_eq!(shared.get_value(size).unwrap().as_float(), Some(2.5));
/// ```
#[derive(Clone, Debug)]
pub struct SharedGraph {
    graph: Arc<RwLock<Graph>>,
}

impl SharedGraph {
    /// Shares `graph`.
    #[must_use]
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(RwLock::new(graph)),
        }
    }

    /// Locks the graph for reading. Re-entrant on one thread.
    pub fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read_recursive()
    }

    /// Locks the graph for editing.
    ///
    /// Must not be called from inside a node's `hash` or `compute`.
    pub fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.graph.write()
    }

    /// The value of `plug` in the current context.
    pub fn get_value(&self, plug: PlugId) -> Result<Value, EvalError> {
        self.get_value_in(plug, &Context::current())
    }

    /// The value of `plug` in `context`.
    pub fn get_value_in(&self, plug: PlugId, context: &Context) -> Result<Value, EvalError> {
        let graph = self.read();
        Evaluator::new(&graph, self).value(plug, context)
    }

    /// The hash of `plug` in the current context.
    pub fn hash(&self, plug: PlugId) -> Result<ContentHash, EvalError> {
        self.hash_in(plug, &Context::current())
    }

    /// The hash of `plug` in `context`.
    pub fn hash_in(&self, plug: PlugId, context: &Context) -> Result<ContentHash, EvalError> {
        let graph = self.read();
        Evaluator::new(&graph, self).hash(plug, context)
    }
}

/// One run of a node's `hash` or `compute`: the output being produced and
/// the context it is produced in.
///
/// Upstream values and hashes are requested through the process so that they
/// are evaluated in the same context unless another is given explicitly.
pub struct Process<'a> {
    eval: Evaluator<'a>,
    plug: PlugId,
    node: NodeId,
    context: &'a Context,
    group: Option<&'a TaskGroup>,
}

impl core::fmt::Debug for Process<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("plug", &self.plug)
            .field("node", &self.node)
            .field("context", &self.context)
            .field("collaborative", &self.group.is_some())
            .finish()
    }
}

impl<'a> Process<'a> {
    /// The output being hashed or computed.
    #[must_use]
    pub fn plug(&self) -> PlugId {
        self.plug
    }

    /// The node owning [`plug`](Self::plug).
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The context of this process.
    #[must_use]
    pub fn context(&self) -> &'a Context {
        self.context
    }

    /// The graph being evaluated.
    #[must_use]
    pub fn graph(&self) -> &'a Graph {
        self.eval.graph
    }

    /// A handle for subtasks.
    #[must_use]
    pub fn shared(&self) -> &'a SharedGraph {
        self.eval.shared
    }

    /// Full name of the output, for messages.
    #[must_use]
    pub fn plug_name(&self) -> String {
        self.eval.graph.full_name(self.plug.0).unwrap_or_default()
    }

    /// Type name of the node.
    #[must_use]
    pub fn node_type(&self) -> &'static str {
        self.eval.graph.type_name(self.node).unwrap_or("?")
    }

    /// The node's plug called `name`.
    pub fn input(&self, name: &str) -> Result<PlugId, ComputeError> {
        self.eval
            .graph
            .child_plug(self.node, name)
            .ok_or_else(|| GraphError::NotFound(name.to_owned()).into())
    }

    /// The value of `plug` in this process's context.
    pub fn get_value(&self, plug: PlugId) -> Result<Value, EvalError> {
        self.eval.value(plug, self.context)
    }

    /// The value of `plug` in another context.
    pub fn get_value_in(&self, plug: PlugId, context: &Context) -> Result<Value, EvalError> {
        self.eval.value(plug, context)
    }

    /// The hash of `plug` in this process's context.
    pub fn hash_of(&self, plug: PlugId) -> Result<ContentHash, EvalError> {
        self.eval.hash(plug, self.context)
    }

    /// The hash of `plug` in another context.
    pub fn hash_of_in(&self, plug: PlugId, context: &Context) -> Result<ContentHash, EvalError> {
        self.eval.hash(plug, context)
    }

    /// Runs `task` as a subtask of a collaborative compute, on the pool.
    ///
    /// Threads waiting for this output help run queued subtasks; the compute
    /// finishes only once all of them have. Outside a collaborative compute
    /// the task runs immediately on this thread. Results come back through
    /// whatever shared state `task` captures.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce(&SharedGraph, &Context) + Send + 'static,
    {
        let shared = self.eval.shared.clone();
        let context = self.context.clone();
        match self.group {
            Some(group) => group.spawn(move || task(&shared, &context)),
            None => task(&shared, &context),
        }
    }

    /// Waits for every subtask spawned so far, running queued ones on this
    /// thread. Fails if the compute was cancelled meanwhile.
    pub fn wait_for_subtasks(&self) -> Result<(), EvalError> {
        match self.group {
            Some(group) => Ok(group.wait()?),
            None => Ok(()),
        }
    }

    /// Fails with [`EvalError::Cancelled`] once the context's canceller has
    /// fired. Long computes call this periodically.
    pub fn check_cancellation(&self) -> Result<(), EvalError> {
        Ok(self.context.check_cancellation()?)
    }
}

/// A read-locked graph plus the handle it was locked through.
#[derive(Copy, Clone)]
struct Evaluator<'a> {
    graph: &'a Graph,
    shared: &'a SharedGraph,
}

impl<'a> Evaluator<'a> {
    fn new(graph: &'a Graph, shared: &'a SharedGraph) -> Self {
        Self { graph, shared }
    }

    /// The node and compute capability behind an output, if it is computed.
    fn computed(&self, plug: PlugId) -> Result<Option<(NodeId, Arc<dyn NodeKind>)>, GraphError> {
        let data = self.graph.plug_data(plug)?;
        if data.direction != Direction::Out || data.plug_type == PlugType::Compound {
            return Ok(None);
        }
        let Some(node) = self.graph.node_of(plug)? else {
            return Ok(None);
        };
        let kind = self.graph.node_kind(node)?;
        Ok(kind.as_compute().is_some().then(|| (node, kind.clone())))
    }

    fn hash(&self, plug: PlugId, context: &Context) -> Result<ContentHash, EvalError> {
        let data = self.graph.plug_data(plug)?;
        if let Some(upstream) = data.input {
            let hash = self.hash(upstream, context)?;
            let from = self.graph.plug_data(upstream)?.plug_type;
            if from == data.plug_type {
                return Ok(hash);
            }
            let mut h = ContentHasher::new();
            h.append(&hash).append(from.name()).append(data.plug_type.name());
            return Ok(h.finish());
        }
        if data.plug_type == PlugType::Compound {
            let mut h = ContentHasher::new();
            h.append("compound");
            for child in self.graph.plugs(plug) {
                h.append(&self.hash(child, context)?);
            }
            return Ok(h.finish());
        }
        if let Some((node, kind)) = self.computed(plug)?
            && let Some(compute) = kind.as_compute()
        {
            return self.compute_hash(plug, node, compute, context);
        }
        let mut h = ContentHasher::new();
        h.append("value").append(self.graph.static_value(plug)?);
        Ok(h.finish())
    }

    fn compute_hash(
        &self,
        plug: PlugId,
        node: NodeId,
        compute: &dyn ComputeNode,
        context: &Context,
    ) -> Result<ContentHash, EvalError> {
        context.check_cancellation()?;
        let cached = compute.hash_cache_policy(plug) != CachePolicy::Uncached;
        let key = (plug, context.hash());
        if cached && let Some(hash) = self.graph.hash_cache.get(&key) {
            return Ok(hash);
        }

        let process = self.process(plug, node, context, None);
        let hash = self.monitored(ProcessType::Hash, plug, context, || {
            let mut h = ContentHasher::new();
            compute.hash(&process, &mut h)?;
            if h.is_empty() {
                return Err(ComputeError::HashNotImplemented {
                    plug: process.plug_name(),
                    node_type: process.node_type(),
                }
                .into());
            }
            h.append(process.node_type())
                .append(self.graph.relative_name(plug.0, node.0)?.as_str());
            Ok(h.finish())
        })?;

        if cached {
            self.graph.hash_cache.insert(key, hash);
        }
        Ok(hash)
    }

    fn value(&self, plug: PlugId, context: &Context) -> Result<Value, EvalError> {
        let data = self.graph.plug_data(plug)?;
        let Some(value_type) = data.plug_type.value_type() else {
            return Err(GraphError::WrongKind {
                id: plug.0,
                expected: "leaf plug",
            }
            .into());
        };
        let value = if let Some(upstream) = data.input {
            self.value(upstream, context)?
        } else if let Some((node, kind)) = self.computed(plug)?
            && let Some(compute) = kind.as_compute()
        {
            self.compute_value(plug, node, compute, context)?
        } else {
            return Ok(self.graph.static_value(plug)?.clone());
        };
        if value.value_type() == value_type {
            return Ok(value);
        }
        value.convert(value_type).ok_or_else(|| {
            ComputeError::TypeMismatch {
                plug: self.graph.full_name(plug.0).unwrap_or_default(),
                from: value.value_type(),
                to: data.plug_type,
            }
            .into()
        })
    }

    fn compute_value(
        &self,
        plug: PlugId,
        node: NodeId,
        compute: &dyn ComputeNode,
        context: &Context,
    ) -> Result<Value, EvalError> {
        let hash = self.compute_hash(plug, node, compute, context)?;
        let policy = if self.graph.plug_data(plug)?.flags.contains(PlugFlags::CACHEABLE) {
            compute.compute_cache_policy(plug)
        } else {
            CachePolicy::Uncached
        };
        self.graph
            .compute_cache
            .get((plug, hash), policy, context.canceller(), |group| {
                context.check_cancellation()?;
                let process = self.process(plug, node, context, group);
                tracing::trace!(plug = ?plug, hash = %hash, "compute");
                self.monitored(ProcessType::Compute, plug, context, || compute.compute(&process))
            })
    }

    fn process<'p>(
        &self,
        plug: PlugId,
        node: NodeId,
        context: &'p Context,
        group: Option<&'p TaskGroup>,
    ) -> Process<'p>
    where
        'a: 'p,
    {
        Process {
            eval: Evaluator::new(self.graph, self.shared),
            plug,
            node,
            context,
            group,
        }
    }

    /// Runs `f`, reporting it to the graph's monitors if there are any.
    fn monitored<R>(
        &self,
        process_type: ProcessType,
        plug: PlugId,
        context: &Context,
        f: impl FnOnce() -> Result<R, EvalError>,
    ) -> Result<R, EvalError> {
        let monitors = &self.graph.monitors;
        if monitors.is_empty() {
            return f();
        }
        for monitor in monitors {
            monitor.process_started(process_type, plug);
        }
        let start = Instant::now();
        let (result, reads) = record_reads(f);
        let info = ProcessInfo {
            process_type,
            plug,
            plug_name: self.graph.full_name(plug.0).unwrap_or_default(),
            context_hash: context.hash(),
            duration: start.elapsed(),
            reads,
            succeeded: result.is_ok(),
        };
        for monitor in monitors {
            monitor.process_finished(&info);
        }
        result
    }
}
