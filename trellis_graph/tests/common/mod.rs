// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node kinds shared by the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]
#![allow(unreachable_pub, reason = "test helpers")]
#![allow(missing_docs, reason = "test helpers")]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use trellis_graph::{
    CachePolicy, ComputeError, ComputeNode, ContentHasher, EvalError, Graph, NodeId, NodeKind,
    PlugDescriptor, PlugId, PlugType, Process, Value,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every input affects every output.
fn affects_all(graph: &Graph, node: NodeId, outputs: &mut Vec<PlugId>) {
    outputs.extend(
        graph
            .plugs(node)
            .filter(|&p| graph.direction(p) == Ok(trellis_graph::Direction::Out)),
    );
}

/// `sum = a + b`, counting computes.
#[derive(Default)]
pub struct Add {
    pub computes: Arc<AtomicUsize>,
    pub policy: CachePolicy,
    pub delay: Duration,
}

impl Add {
    pub fn counted() -> (Self, Arc<AtomicUsize>) {
        let add = Self::default();
        let computes = add.computes.clone();
        (add, computes)
    }
}

impl NodeKind for Add {
    fn type_name(&self) -> &'static str {
        "Add"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("a", PlugType::Int),
            PlugDescriptor::input("b", PlugType::Int),
            PlugDescriptor::output("sum", PlugType::Int),
        ]
    }

    fn affects(&self, graph: &Graph, node: NodeId, _input: PlugId, outputs: &mut Vec<PlugId>) {
        affects_all(graph, node, outputs);
    }

    fn as_compute(&self) -> Option<&dyn ComputeNode> {
        Some(self)
    }
}

impl ComputeNode for Add {
    fn hash(&self, process: &Process<'_>, h: &mut ContentHasher) -> Result<(), EvalError> {
        h.append(&process.hash_of(process.input("a")?)?);
        h.append(&process.hash_of(process.input("b")?)?);
        Ok(())
    }

    fn compute(&self, process: &Process<'_>) -> Result<Value, EvalError> {
        self.computes.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let a = process.get_value(process.input("a")?)?.as_int().unwrap_or(0);
        let b = process.get_value(process.input("b")?)?.as_int().unwrap_or(0);
        Ok(Value::from(a + b))
    }

    fn compute_cache_policy(&self, _output: PlugId) -> CachePolicy {
        self.policy
    }
}

/// `out = scale * frame`. With `hash_frame` unset its hash forgets the
/// frame, which is a bug the sanitiser reports.
pub struct Scaled {
    pub hash_frame: bool,
}

impl NodeKind for Scaled {
    fn type_name(&self) -> &'static str {
        "Scaled"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("scale", PlugType::Float).with_default(1.0),
            PlugDescriptor::output("out", PlugType::Float),
        ]
    }

    fn affects(&self, graph: &Graph, node: NodeId, _input: PlugId, outputs: &mut Vec<PlugId>) {
        affects_all(graph, node, outputs);
    }

    fn as_compute(&self) -> Option<&dyn ComputeNode> {
        Some(self)
    }
}

impl ComputeNode for Scaled {
    fn hash(&self, process: &Process<'_>, h: &mut ContentHasher) -> Result<(), EvalError> {
        h.append(&process.hash_of(process.input("scale")?)?);
        if self.hash_frame {
            h.append(&process.context().frame());
        }
        Ok(())
    }

    fn compute(&self, process: &Process<'_>) -> Result<Value, EvalError> {
        let scale = process
            .get_value(process.input("scale")?)?
            .as_float()
            .unwrap_or(0.0);
        Ok(Value::from(scale * process.context().frame()))
    }
}

/// Fails its first compute with "Oops!".
#[derive(Default)]
pub struct Flaky {
    pub failed: AtomicBool,
}

impl NodeKind for Flaky {
    fn type_name(&self) -> &'static str {
        "Flaky"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![PlugDescriptor::output("out", PlugType::String)]
    }

    fn as_compute(&self) -> Option<&dyn ComputeNode> {
        Some(self)
    }
}

impl ComputeNode for Flaky {
    fn hash(&self, _process: &Process<'_>, h: &mut ContentHasher) -> Result<(), EvalError> {
        h.append("flaky");
        Ok(())
    }

    fn compute(&self, _process: &Process<'_>) -> Result<Value, EvalError> {
        if self.failed.swap(true, Ordering::Relaxed) {
            Ok(Value::from("fine"))
        } else {
            Err(ComputeError::failed("Oops!").into())
        }
    }
}

/// A compute node that forgot to implement `hash`.
pub struct Unhashed;

impl NodeKind for Unhashed {
    fn type_name(&self) -> &'static str {
        "Unhashed"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![PlugDescriptor::output("out", PlugType::Int)]
    }

    fn as_compute(&self) -> Option<&dyn ComputeNode> {
        Some(self)
    }
}

impl ComputeNode for Unhashed {}

/// `out = sum of i * i for i in 0..count`, one subtask per term.
#[derive(Default)]
pub struct SumOfSquares {
    pub computes: Arc<AtomicUsize>,
}

impl NodeKind for SumOfSquares {
    fn type_name(&self) -> &'static str {
        "SumOfSquares"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("count", PlugType::Int),
            PlugDescriptor::output("out", PlugType::Int),
        ]
    }

    fn affects(&self, graph: &Graph, node: NodeId, _input: PlugId, outputs: &mut Vec<PlugId>) {
        affects_all(graph, node, outputs);
    }

    fn as_compute(&self) -> Option<&dyn ComputeNode> {
        Some(self)
    }
}

impl ComputeNode for SumOfSquares {
    fn hash(&self, process: &Process<'_>, h: &mut ContentHasher) -> Result<(), EvalError> {
        h.append(&process.hash_of(process.input("count")?)?);
        Ok(())
    }

    fn compute(&self, process: &Process<'_>) -> Result<Value, EvalError> {
        self.computes.fetch_add(1, Ordering::Relaxed);
        let count_plug = process.input("count")?;
        let count = process.get_value(count_plug)?.as_int().unwrap_or(0);
        let total = Arc::new(Mutex::new(0_i64));
        for i in 0..count {
            let total = total.clone();
            process.spawn(move |shared, context| {
                // Subtasks may evaluate the graph too.
                let limit = shared
                    .get_value_in(count_plug, context)
                    .ok()
                    .and_then(|v| v.as_int())
                    .unwrap_or(0);
                if i < limit {
                    std::thread::sleep(Duration::from_millis(1));
                    *total.lock() += i * i;
                }
            });
        }
        process.wait_for_subtasks()?;
        let total = *total.lock();
        Ok(Value::from(total))
    }

    fn compute_cache_policy(&self, _output: PlugId) -> CachePolicy {
        CachePolicy::Collaborative
    }
}
