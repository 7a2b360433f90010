// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Connections, static values and affects edges.

use hashbrown::HashMap;
use smallvec::SmallVec;
use trellis_context::Value;
use trellis_dirty::CycleHandling;

use super::Graph;
use crate::error::GraphError;
use crate::ids::{NodeId, PlugId};
use crate::plug::{Direction, PlugFlags, PlugType};

impl Graph {
    // --- connections ---

    /// Connects input `plug` to output `upstream`, or disconnects it when
    /// `upstream` is `None`.
    ///
    /// The destination must be an input accepting connections, the upstream
    /// an output of a convertible type, and the destination's node must
    /// accept the input. Compound plugs connect their children pairwise.
    /// Connections that would make a plug depend on itself are refused with
    /// [`GraphError::Cycle`]. On success `input_changed` fires for every plug
    /// whose input changed, followed by a single dirty wave.
    pub fn set_input(&mut self, plug: PlugId, upstream: Option<PlugId>) -> Result<(), GraphError> {
        self.check_input(plug, upstream)?;
        let mut scope = self.dirty_propagation_scope();
        scope.connect(plug, upstream)
    }

    fn check_input(&self, plug: PlugId, upstream: Option<PlugId>) -> Result<(), GraphError> {
        let reject = |reason: &'static str| {
            tracing::debug!(?plug, ?upstream, reason, "input rejected");
            GraphError::InputRejected { plug, reason }
        };
        let data = self.plug_data(plug)?;
        if data.direction != Direction::In {
            return Err(reject("outputs cannot receive connections"));
        }
        let Some(upstream) = upstream else {
            return Ok(());
        };
        if !data.flags.contains(PlugFlags::ACCEPTS_INPUTS) {
            return Err(reject("the plug does not accept inputs"));
        }
        let up = self.plug_data(upstream)?;
        if up.direction != Direction::Out {
            return Err(reject("only outputs can be connected upstream"));
        }
        if !data.plug_type.accepts(up.plug_type) {
            return Err(GraphError::TypeMismatch {
                from: up.plug_type,
                to: data.plug_type,
            });
        }
        if let Some(node) = self.node_of(plug)?
            && !self.node_kind(node)?.accepts_input(self, plug, upstream)
        {
            return Err(reject("the node refused the input"));
        }
        if data.input != Some(upstream) && self.dependencies.would_create_cycle(plug, upstream) {
            tracing::debug!(?plug, ?upstream, "connection would create a cycle");
            return Err(GraphError::Cycle {
                destination: plug,
                upstream,
            });
        }
        if data.plug_type == PlugType::Compound {
            let children: Vec<PlugId> = self.plugs(plug).collect();
            let upstream_children: Vec<PlugId> = self.plugs(upstream).collect();
            if children.len() != upstream_children.len() {
                return Err(reject("compound plugs differ in shape"));
            }
            for (child, up_child) in children.into_iter().zip(upstream_children) {
                self.check_input(child, Some(up_child))?;
            }
        }
        Ok(())
    }

    /// Applies a connection that `check_input` accepted. Compound children
    /// are connected first; on a cycle found among them everything applied
    /// so far is undone.
    pub(super) fn connect(&mut self, plug: PlugId, upstream: Option<PlugId>) -> Result<(), GraphError> {
        let mut applied = Vec::new();
        let result = self.connect_recursive(plug, upstream, &mut applied);
        if result.is_err() {
            for (plug, previous) in applied.into_iter().rev() {
                self.connect_one(plug, previous, CycleHandling::Allow)?;
            }
        }
        result
    }

    fn connect_recursive(
        &mut self,
        plug: PlugId,
        upstream: Option<PlugId>,
        applied: &mut Vec<(PlugId, Option<PlugId>)>,
    ) -> Result<(), GraphError> {
        if self.plug_data(plug)?.plug_type == PlugType::Compound {
            let children: Vec<PlugId> = self.plugs(plug).collect();
            let upstream_children: Vec<Option<PlugId>> = match upstream {
                Some(up) => self.plugs(up).map(Some).collect(),
                None => vec![None; children.len()],
            };
            for (child, up_child) in children.into_iter().zip(upstream_children) {
                self.connect_recursive(child, up_child, applied)?;
            }
        }
        let previous = self.plug_data(plug)?.input;
        if self.connect_one(plug, upstream, CycleHandling::Error)? {
            applied.push((plug, previous));
        }
        Ok(())
    }

    /// Returns `false` if the plug was already connected to `upstream`.
    fn connect_one(
        &mut self,
        plug: PlugId,
        upstream: Option<PlugId>,
        handling: CycleHandling,
    ) -> Result<bool, GraphError> {
        let previous = self.plug_data(plug)?.input;
        if previous == upstream {
            return Ok(false);
        }
        self.dependencies
            .replace_dependencies(plug, upstream, handling)
            .map_err(|cycle| GraphError::Cycle {
                destination: cycle.from,
                upstream: cycle.to,
            })?;
        if let Some(previous) = previous
            && let Ok(data) = self.plug_data_mut(previous)
        {
            data.outputs.retain(|&mut down| down != plug);
        }
        if let Some(upstream) = upstream {
            self.plug_data_mut(upstream)?.outputs.push(plug);
        }
        self.plug_data_mut(plug)?.input = upstream;
        self.signals.input_changed.emit(&plug);
        self.dirty(plug);
        Ok(true)
    }

    /// The output this input is connected to.
    pub fn input(&self, plug: PlugId) -> Result<Option<PlugId>, GraphError> {
        Ok(self.plug_data(plug)?.input)
    }

    /// The inputs this output drives.
    pub fn outputs(&self, plug: PlugId) -> Result<&[PlugId], GraphError> {
        Ok(&self.plug_data(plug)?.outputs)
    }

    /// Follows inputs upstream until reaching an unconnected plug.
    pub fn source(&self, plug: PlugId) -> Result<PlugId, GraphError> {
        let mut current = plug;
        while let Some(up) = self.plug_data(current)?.input {
            current = up;
        }
        Ok(current)
    }

    /// The plug's direction.
    pub fn direction(&self, plug: PlugId) -> Result<Direction, GraphError> {
        Ok(self.plug_data(plug)?.direction)
    }

    /// The plug's type.
    pub fn plug_type(&self, plug: PlugId) -> Result<PlugType, GraphError> {
        Ok(self.plug_data(plug)?.plug_type)
    }

    /// The plug's flags.
    pub fn flags(&self, plug: PlugId) -> Result<PlugFlags, GraphError> {
        Ok(self.plug_data(plug)?.flags)
    }

    // --- static values ---

    /// Sets the static value of an unconnected input plug.
    ///
    /// The value is converted to the plug's type. Setting the value the plug
    /// already holds does nothing; otherwise `plug_set` fires and dirtiness
    /// propagates downstream.
    pub fn set_value(&mut self, plug: PlugId, value: impl Into<Value>) -> Result<(), GraphError> {
        let value = value.into();
        let data = self.plug_data(plug)?;
        let Some(value_type) = data.plug_type.value_type() else {
            return Err(GraphError::NotSettable(plug));
        };
        if data.direction != Direction::In || data.input.is_some() {
            return Err(GraphError::NotSettable(plug));
        }
        let value = value.convert(value_type).ok_or(GraphError::TypeMismatch {
            from: value.value_type().into(),
            to: data.plug_type,
        })?;
        if data.value.as_ref() == Some(&value) {
            return Ok(());
        }
        self.plug_data_mut(plug)?.value = Some(value);
        self.signals.plug_set.emit(&plug);
        self.dirty(plug);
        Ok(())
    }

    /// The static value: the last value set, or the default.
    pub fn static_value(&self, plug: PlugId) -> Result<&Value, GraphError> {
        let data = self.plug_data(plug)?;
        data.value
            .as_ref()
            .or(data.default.as_ref())
            .ok_or(GraphError::NotSettable(plug))
    }

    /// The default value. Compound plugs have none.
    pub fn default_value(&self, plug: PlugId) -> Result<&Value, GraphError> {
        self.plug_data(plug)?
            .default
            .as_ref()
            .ok_or(GraphError::NotSettable(plug))
    }

    /// Restores the default value, for every child of a compound.
    pub fn set_to_default(&mut self, plug: PlugId) -> Result<(), GraphError> {
        let mut scope = self.dirty_propagation_scope();
        scope.reset_recursive(plug)
    }

    fn reset_recursive(&mut self, plug: PlugId) -> Result<(), GraphError> {
        let children: Vec<PlugId> = self.plugs(plug).collect();
        for child in children {
            self.reset_recursive(child)?;
        }
        let data = self.plug_data_mut(plug)?;
        if data.value.take().is_some() {
            self.signals.plug_set.emit(&plug);
            self.dirty(plug);
        }
        Ok(())
    }

    /// Returns `true` if the plug, and every child of a compound, is
    /// unconnected and holds its default value.
    pub fn is_set_to_default(&self, plug: PlugId) -> Result<bool, GraphError> {
        let data = self.plug_data(plug)?;
        if data.input.is_some() {
            return Ok(false);
        }
        if data.value.is_some() && data.value != data.default {
            return Ok(false);
        }
        for child in self.plugs(plug) {
            if !self.is_set_to_default(child)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // --- affects ---

    /// Rebuilds the edges from a node's inputs to the outputs they affect.
    pub(super) fn rebuild_affects(&mut self, node: NodeId) -> Result<(), GraphError> {
        let kind = self.node_kind(node)?.clone();
        let (inputs, outputs): (Vec<PlugId>, Vec<PlugId>) = self
            .subtree(node.0)
            .into_iter()
            .skip(1)
            .filter_map(|c| self.as_plug(c))
            .filter(|&p| self.owning_node(p.0) == Some(node))
            .partition(|&p| self.direction(p) == Ok(Direction::In));

        let mut affected: HashMap<PlugId, SmallVec<[PlugId; 4]>> = HashMap::new();
        let mut scratch = Vec::new();
        for &input in &inputs {
            scratch.clear();
            kind.affects(self, node, input, &mut scratch);
            for &output in &scratch {
                if outputs.contains(&output) {
                    affected.entry(output).or_default().push(input);
                }
            }
        }
        for output in outputs {
            let deps = affected.remove(&output).unwrap_or_default();
            if let Err(cycle) =
                self.dependencies
                    .replace_dependencies(output, deps.iter().copied(), CycleHandling::Error)
            {
                tracing::warn!(
                    node = kind.type_name(),
                    from = ?cycle.from,
                    to = ?cycle.to,
                    "affects edge would create a cycle and was skipped"
                );
                self.dependencies
                    .replace_dependencies(output, deps, CycleHandling::Ignore)
                    .ok();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Container, NodeKind};
    use crate::plug::PlugDescriptor;

    /// `out` depends on `in`.
    struct Pass;

    impl NodeKind for Pass {
        fn type_name(&self) -> &'static str {
            "Pass"
        }

        fn plugs(&self) -> Vec<PlugDescriptor> {
            vec![
                PlugDescriptor::input("in", PlugType::Float),
                PlugDescriptor::output("out", PlugType::Float),
            ]
        }

        fn affects(&self, graph: &Graph, node: NodeId, input: PlugId, outputs: &mut Vec<PlugId>) {
            if graph.child_plug(node, "in") == Some(input) {
                outputs.extend(graph.child_plug(node, "out"));
            }
        }
    }

    fn pass(graph: &mut Graph, name: &str) -> (PlugId, PlugId) {
        let root = graph.root();
        let node = graph.add_node(root, name, Pass).unwrap();
        (
            graph.child_plug(node, "in").unwrap(),
            graph.child_plug(node, "out").unwrap(),
        )
    }

    #[test]
    fn connect_and_disconnect() {
        let mut graph = Graph::new();
        let (_, a_out) = pass(&mut graph, "a");
        let (b_in, _) = pass(&mut graph, "b");

        graph.set_input(b_in, Some(a_out)).unwrap();
        assert_eq!(graph.input(b_in).unwrap(), Some(a_out));
        assert_eq!(graph.outputs(a_out).unwrap(), &[b_in]);

        graph.set_input(b_in, None).unwrap();
        assert_eq!(graph.input(b_in).unwrap(), None);
        assert!(graph.outputs(a_out).unwrap().is_empty());
    }

    #[test]
    fn connection_rules() {
        let mut graph = Graph::new();
        let (a_in, a_out) = pass(&mut graph, "a");
        let (b_in, b_out) = pass(&mut graph, "b");

        assert!(matches!(
            graph.set_input(a_out, Some(b_out)),
            Err(GraphError::InputRejected { .. })
        ));
        assert!(matches!(
            graph.set_input(b_in, Some(a_in)),
            Err(GraphError::InputRejected { .. })
        ));

        graph.set_input(b_in, Some(a_out)).unwrap();
        assert_eq!(
            graph.set_input(a_in, Some(b_out)),
            Err(GraphError::Cycle {
                destination: a_in,
                upstream: b_out
            })
        );
        assert_eq!(graph.input(a_in).unwrap(), None);

        let root = graph.root();
        let n = graph.add_node(root, "n", Container).unwrap();
        let text = graph
            .add_plug(n.into(), PlugDescriptor::output("text", PlugType::String))
            .unwrap();
        assert_eq!(
            graph.set_input(a_in, Some(text)),
            Err(GraphError::TypeMismatch {
                from: PlugType::String,
                to: PlugType::Float
            })
        );
        let locked = graph
            .add_plug(
                n.into(),
                PlugDescriptor::input("locked", PlugType::Float).with_flags(PlugFlags::SERIALISABLE),
            )
            .unwrap();
        assert!(matches!(
            graph.set_input(locked, Some(a_out)),
            Err(GraphError::InputRejected { .. })
        ));
    }

    #[test]
    fn compound_plugs_connect_pairwise() {
        let mut graph = Graph::new();
        let root = graph.root();
        let n = graph.add_node(root, "n", Container).unwrap();
        let color = |direction| {
            PlugDescriptor::compound("c", direction)
                .with_child(PlugDescriptor::new("r", direction, PlugType::Float))
                .with_child(PlugDescriptor::new("g", direction, PlugType::Float))
        };
        let out = graph.add_plug(n.into(), color(Direction::Out)).unwrap();
        let m = graph.add_node(root, "m", Container).unwrap();
        let inp = graph.add_plug(m.into(), color(Direction::In)).unwrap();

        graph.set_input(inp, Some(out)).unwrap();
        let out_children: Vec<_> = graph.plugs(out).collect();
        let in_children: Vec<_> = graph.plugs(inp).collect();
        for (i, o) in in_children.iter().zip(&out_children) {
            assert_eq!(graph.input(*i).unwrap(), Some(*o));
        }
        assert!(!graph.is_set_to_default(inp).unwrap());

        graph.set_input(inp, None).unwrap();
        assert!(in_children.iter().all(|&i| graph.input(i).unwrap().is_none()));
        assert!(graph.is_set_to_default(inp).unwrap());
    }

    #[test]
    fn static_values() {
        let mut graph = Graph::new();
        let (a_in, a_out) = pass(&mut graph, "a");
        let (b_in, _) = pass(&mut graph, "b");

        graph.set_value(a_in, 2).unwrap();
        assert_eq!(graph.static_value(a_in).unwrap(), &Value::Float(2.0));
        assert!(!graph.is_set_to_default(a_in).unwrap());
        assert_eq!(
            graph.set_value(a_in, "two"),
            Err(GraphError::TypeMismatch {
                from: PlugType::String,
                to: PlugType::Float
            })
        );
        assert_eq!(graph.set_value(a_out, 1.0), Err(GraphError::NotSettable(a_out)));

        graph.set_input(b_in, Some(a_out)).unwrap();
        assert_eq!(graph.set_value(b_in, 1.0), Err(GraphError::NotSettable(b_in)));

        graph.set_to_default(a_in).unwrap();
        assert_eq!(graph.static_value(a_in).unwrap(), &Value::Float(0.0));
        assert!(graph.is_set_to_default(a_in).unwrap());
    }

    #[test]
    fn affects_edges_follow_plug_changes() {
        let mut graph = Graph::new();
        let (a_in, a_out) = pass(&mut graph, "a");
        assert!(graph.dependencies.dependencies(a_out).any(|d| d == a_in));

        let node = graph.node_of(a_in).unwrap().unwrap();
        graph.remove_child(node.into(), a_in.into()).unwrap();
        assert!(!graph.dependencies.has_dependencies(a_out));
    }
}
