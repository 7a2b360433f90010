// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Graph: a node graph with dirty propagation and memoized,
//! multithreaded evaluation.
//!
//! - **Hierarchy** ([`Graph`]): nodes and plugs in a named tree, addressed by
//!   generational ids, with signals for every structural change.
//! - **Connections**: inputs connected to outputs, with type checking, cycle
//!   refusal and dirty propagation batched by [`DirtyPropagationScope`].
//! - **Evaluation** ([`SharedGraph`], [`Process`]): values are hashed before
//!   they are computed, and computed values are cached by hash, so identical
//!   work is done once however many plugs or contexts ask for it.
//! - **Behavior** ([`NodeKind`], [`ComputeNode`]): what a node declares,
//!   which inputs affect which outputs, and how outputs are produced.
//! - **Monitoring** ([`Monitor`], [`PerformanceMonitor`],
//!   [`ContextSanitiser`]): observe the processes evaluation runs.
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis_graph::{
//!     ComputeNode, ContentHasher, EvalError, Graph, NodeId, NodeKind, PlugDescriptor, PlugId,
//!     PlugType, Process, SharedGraph, Value,
//! };
//!
//! struct Add;
//!
//! impl NodeKind for Add {
//!     fn type_name(&self) -> &'static str {
//!         "Add"
//!     }
//!
//!     fn plugs(&self) -> Vec<PlugDescriptor> {
//!         vec![
//!             PlugDescriptor::input("a", PlugType::Int),
//!             PlugDescriptor::input("b", PlugType::Int),
//!             PlugDescriptor::output("sum", PlugType::Int),
//!         ]
//!     }
//!
//!     fn affects(&self, graph: &Graph, node: NodeId, _input: PlugId, outputs: &mut Vec<PlugId>) {
//!         outputs.extend(graph.child_plug(node, "sum"));
//!     }
//!
//!     fn as_compute(&self) -> Option<&dyn ComputeNode> {
//!         Some(self)
//!     }
//! }
//!
//! impl ComputeNode for Add {
//!     fn hash(&self, process: &Process<'_>, h: &mut ContentHasher) -> Result<(), EvalError> {
//!         h.append(&process.hash_of(process.input("a")?)?);
//!         h.append(&process.hash_of(process.input("b")?)?);
//!         Ok(())
//!     }
//!
//!     fn compute(&self, process: &Process<'_>) -> Result<Value, EvalError> {
//!         let a = process.get_value(process.input("a")?)?.as_int().unwrap_or(0);
//!         let b = process.get_value(process.input("b")?)?.as_int().unwrap_or(0);
//!         Ok(Value::from(a + b))
//!     }
//! }
//!
//! let mut graph = Graph::new();
//! let root = graph.root();
//! let add = graph.add_node(root, "add", Add).unwrap();
//! let a = graph.child_plug(add, "a").unwrap();
//! let sum = graph.child_plug(add, "sum").unwrap();
//! graph.set_value(a, 2).unwrap();
//!
//! let shared = SharedGraph::new(graph);
//! assert_eq!(shared.get_value(sum).unwrap(), Value::Int(2));
//!
//! shared.write().set_value(a, 40).unwrap();
//! assert_eq!(shared.get_value(sum).unwrap(), Value::Int(40));
//! ```
//!
//! ## Threading
//!
//! Structural edits need `&mut Graph`. Any number of threads may evaluate a
//! [`SharedGraph`] at once; requests for the same output in the same context
//! are computed by one thread while the others wait or, for
//! [`CachePolicy::Collaborative`] outputs, help with its subtasks.

mod config;
mod error;
mod eval;
mod events;
mod graph;
mod ids;
mod monitor;
mod node;
mod plug;

pub use config::CacheConfig;
pub use error::{ComputeError, EvalError, GraphError};
pub use eval::{Process, SharedGraph};
pub use events::{ChildChanged, GraphSignals, NameChanged, ParentChanged};
pub use graph::{DirtyPropagationScope, Graph};
pub use ids::{ComponentId, NodeId, PlugId};
pub use monitor::{
    ContextSanitiser, HashCompletenessViolation, Monitor, PerformanceMonitor, PlugStatistics,
    ProcessInfo, ProcessType,
};
pub use node::{CachePolicy, ComputeNode, Container, NodeKind};
pub use plug::{Direction, PlugDescriptor, PlugFlags, PlugType};

pub use trellis_context::{
    Cancelled, Canceller, ContentHash, ContentHasher, Context, EditableScope, Scope, Value,
    ValueType,
};
pub use trellis_signal::{Connection, ScopedConnection, Signal};
