// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Dirty: the dependency graph behind plug invalidation.
//!
//! When a plug changes, every plug computed from it can no longer trust its
//! previous result. This crate keeps the "depends on" edges between keys and
//! turns one edit into an ordered wave of dirty keys:
//!
//! - [`DirtyGraph`] stores edges in both directions and refuses cycles
//!   according to [`CycleHandling`].
//! - [`EagerPolicy`] marks the whole closure of an edited key into a
//!   [`DirtySet`], visiting each key once per wave.
//! - [`DrainSortedDeterministic`] yields a wave upstream-first, breaking ties
//!   by key order.
//! - [`OneParentRecorder`] keeps one cause per key, so a wave can be
//!   explained afterwards.
//!
//! ```rust
//! use trellis_dirty::{
//!     CycleHandling, DirtyGraph, DirtySet, EagerPolicy, TraversalScratch,
//!     drain_sorted_deterministic,
//! };
//!
//! // 1 feeds 2 and 3, both feed 4.
//! let mut graph = DirtyGraph::<u32>::new();
//! graph.add_dependency(2, 1, CycleHandling::Error).unwrap();
//! graph.add_dependency(3, 1, CycleHandling::Error).unwrap();
//! graph.add_dependency(4, 2, CycleHandling::Error).unwrap();
//! graph.add_dependency(4, 3, CycleHandling::Error).unwrap();
//! assert!(graph.add_dependency(1, 4, CycleHandling::Error).is_err());
//!
//! let mut dirty = DirtySet::new();
//! let mut scratch = TraversalScratch::new();
//! EagerPolicy.propagate_with_scratch(1, &graph, &mut dirty, &mut scratch);
//!
//! let order: Vec<_> = drain_sorted_deterministic(&mut dirty, &graph).collect();
//! assert_eq!(order, vec![1, 2, 3, 4]);
//! ```
//!
//! The crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod drain;
mod graph;
mod policy;
mod scratch;
mod set;
mod trace;

pub use drain::{DrainCompletion, DrainSortedDeterministic, drain_sorted_deterministic};
pub use graph::{CycleError, CycleHandling, DenseKey, DirtyGraph};
pub use policy::EagerPolicy;
pub use scratch::TraversalScratch;
pub use set::DirtySet;
pub use trace::OneParentRecorder;
