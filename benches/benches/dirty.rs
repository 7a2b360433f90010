// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use trellis_dirty::{
    CycleHandling, DirtyGraph, DirtySet, EagerPolicy, TraversalScratch, drain_sorted_deterministic,
};
use trellis_graph::{Graph, NodeId, NodeKind, PlugDescriptor, PlugId, PlugType};

#[derive(Clone)]
struct Lcg(u64);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        // Numerical Recipes LCG parameters.
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 32) as u32
    }
}

fn build_dag(n: u32, edges_per_node: u32, seed: u64) -> DirtyGraph<u32> {
    let mut graph = DirtyGraph::new();
    let mut rng = Lcg(seed);
    // Edges only point at lower keys, so the graph stays acyclic.
    for from in 1..n {
        for _ in 0..edges_per_node.min(from) {
            let to = rng.next_u32() % from;
            let _ = graph.add_dependency(from, to, CycleHandling::Allow);
        }
    }
    graph
}

/// `out` depends on `in`.
struct Link;

impl NodeKind for Link {
    fn type_name(&self) -> &'static str {
        "Link"
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
}

/// A chain of `len` links, each output feeding the next input. Returns the
/// first input.
fn build_chain(len: usize) -> (Graph, PlugId) {
    let mut graph = Graph::new();
    let root = graph.root();
    let mut links = Vec::with_capacity(len);
    for _ in 0..len {
        let node = graph.add_node(root, "link", Link).unwrap();
        let input = graph.child_plug(node, "in").unwrap();
        let output = graph.child_plug(node, "out").unwrap();
        if let Some(&(_, previous)) = links.last() {
            graph.set_input(input, Some(previous)).unwrap();
        }
        links.push((input, output));
    }
    (graph, links[0].0)
}

fn bench_dirty(c: &mut Criterion) {
    let mut group = c.benchmark_group("trellis_dirty");
    group.sample_size(50);

    for &(n, edges_per_node) in &[(256_u32, 1_u32), (4_096, 1), (4_096, 4)] {
        group.bench_function(format!("eager_mark_and_drain(n={n},e={edges_per_node})"), |b| {
            b.iter_batched(
                || build_dag(n, edges_per_node, 0xD1A7_0000_0000_0002),
                |graph| {
                    let mut dirty = DirtySet::new();
                    let mut scratch = TraversalScratch::with_capacity(n as usize / 2);
                    EagerPolicy.propagate_with_scratch(0, &graph, &mut dirty, &mut scratch);
                    let sum: u64 = drain_sorted_deterministic(&mut dirty, &graph)
                        .fold(0_u64, |acc, k| acc + u64::from(k));
                    black_box(sum);
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();

    let mut group = c.benchmark_group("trellis_graph_dirty");
    for len in [16_usize, 256] {
        group.bench_function(format!("set_value_chain(len={len})"), |b| {
            let (mut graph, head) = build_chain(len);
            let mut value = 0_i64;
            b.iter(|| {
                value += 1;
                graph.set_value(head, value).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dirty);
criterion_main!(benches);
