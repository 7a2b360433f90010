// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use trellis_graph::{
    ComputeNode, ContentHasher, Context, EvalError, Graph, NodeId, NodeKind, PlugDescriptor,
    PlugId, PlugType, Process, SharedGraph, Value,
};

/// `out = in + 1`.
struct Increment;

impl NodeKind for Increment {
    fn type_name(&self) -> &'static str {
        "Increment"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("in", PlugType::Int),
            PlugDescriptor::output("out", PlugType::Int),
        ]
    }

    fn affects(&self, graph: &Graph, node: NodeId, _input: PlugId, outputs: &mut Vec<PlugId>) {
        outputs.extend(graph.child_plug(node, "out"));
    }

    fn as_compute(&self) -> Option<&dyn ComputeNode> {
        Some(self)
    }
}

impl ComputeNode for Increment {
    fn hash(&self, process: &Process<'_>, h: &mut ContentHasher) -> Result<(), EvalError> {
        h.append(&process.hash_of(process.input("in")?)?);
        Ok(())
    }

    fn compute(&self, process: &Process<'_>) -> Result<Value, EvalError> {
        let value = process.get_value(process.input("in")?)?;
        Ok(Value::from(value.as_int().unwrap_or(0) + 1))
    }
}

/// `len` increments in a chain. Returns the first input and last output.
fn build_chain(len: usize) -> (SharedGraph, PlugId, PlugId) {
    let mut graph = Graph::new();
    let root = graph.root();
    let mut head = None;
    let mut tail: Option<PlugId> = None;
    for _ in 0..len {
        let node = graph.add_node(root, "inc", Increment).unwrap();
        let input = graph.child_plug(node, "in").unwrap();
        if let Some(tail) = tail {
            graph.set_input(input, Some(tail)).unwrap();
        }
        head.get_or_insert(input);
        tail = graph.child_plug(node, "out");
    }
    (SharedGraph::new(graph), head.unwrap(), tail.unwrap())
}

fn bench_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("trellis_graph_eval");
    for len in [16_usize, 128] {
        group.bench_function(format!("cached_value(len={len})"), |b| {
            let (shared, _, tail) = build_chain(len);
            let context = Context::new();
            shared.get_value_in(tail, &context).unwrap();
            b.iter(|| black_box(shared.get_value_in(tail, &context).unwrap()));
        });

        group.bench_function(format!("recompute_after_edit(len={len})"), |b| {
            let (shared, head, tail) = build_chain(len);
            let context = Context::new();
            let mut value = 0_i64;
            b.iter(|| {
                value += 1;
                shared.write().set_value(head, value).unwrap();
                black_box(shared.get_value_in(tail, &context).unwrap())
            });
        });

        group.bench_function(format!("new_context(len={len})"), |b| {
            let (shared, _, tail) = build_chain(len);
            let mut frame = 0.0;
            b.iter(|| {
                frame += 1.0;
                let context = Context::new().with("frame", frame);
                black_box(shared.hash_in(tail, &context).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluation);
criterion_main!(benches);
