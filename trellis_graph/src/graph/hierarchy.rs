// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Creation, parenting, naming and hierarchy queries.

use std::iter;
use std::sync::Arc;

use hashbrown::HashSet;
use smallvec::SmallVec;
use trellis_context::Value;

use super::{Component, ComponentData, Graph, NodeData, PlugData};
use crate::error::GraphError;
use crate::events::{ChildChanged, NameChanged, ParentChanged};
use crate::ids::{ComponentId, NodeId, PlugId};
use crate::node::NodeKind;
use crate::plug::{PlugDescriptor, PlugType};

/// Checks `[A-Za-z_][A-Za-z_0-9]*`.
pub(crate) fn validate_name(name: &str) -> Result<(), GraphError> {
    let mut bytes = name.bytes();
    let valid = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(GraphError::InvalidName(name.to_owned()))
    }
}

impl Graph {
    // --- creation ---

    /// Creates a parentless node with the plugs its kind declares.
    pub fn create_node(&mut self, name: &str, kind: impl NodeKind) -> Result<NodeId, GraphError> {
        self.create_node_shared(name, Arc::new(kind))
    }

    /// Like [`create_node`](Self::create_node), for a kind shared with other
    /// nodes.
    pub fn create_node_shared(
        &mut self,
        name: &str,
        kind: Arc<dyn NodeKind>,
    ) -> Result<NodeId, GraphError> {
        validate_name(name)?;
        let plugs = kind.plugs();
        let node = NodeId(self.allocate(Component {
            name: Arc::from(name),
            parent: None,
            children: Vec::new(),
            data: ComponentData::Node(NodeData { kind }),
        }));
        for descriptor in &plugs {
            if let Err(err) = self.attach_new_plug(node.0, descriptor) {
                self.destroy(node.0);
                return Err(err);
            }
        }
        Ok(node)
    }

    /// Creates a node and parents it to `parent`.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: impl NodeKind,
    ) -> Result<NodeId, GraphError> {
        let node = self.create_node(name, kind)?;
        if let Err(err) = self.add_child(parent.0, node.0) {
            self.destroy(node.0);
            return Err(err);
        }
        Ok(node)
    }

    /// Creates a parentless plug, with its compound children.
    pub fn create_plug(&mut self, descriptor: &PlugDescriptor) -> Result<PlugId, GraphError> {
        validate_name(descriptor.name())?;
        let plug_type = descriptor.plug_type();
        let default = match plug_type.value_type() {
            Some(value_type) => Some(match descriptor.default_value() {
                Some(value) => value.convert(value_type).ok_or(GraphError::TypeMismatch {
                    from: value.value_type().into(),
                    to: plug_type,
                })?,
                None => Value::default_of(value_type),
            }),
            None => None,
        };
        if default.is_some() && !descriptor.children().is_empty() {
            return Err(GraphError::TypeMismatch {
                from: PlugType::Compound,
                to: plug_type,
            });
        }
        let plug = PlugId(self.allocate(Component {
            name: Arc::from(descriptor.name()),
            parent: None,
            children: Vec::new(),
            data: ComponentData::Plug(PlugData {
                direction: descriptor.direction(),
                plug_type,
                flags: descriptor.flags(),
                default,
                value: None,
                input: None,
                outputs: SmallVec::new(),
            }),
        }));
        for child in descriptor.children() {
            if let Err(err) = self.attach_new_plug(plug.0, child) {
                self.destroy(plug.0);
                return Err(err);
            }
        }
        Ok(plug)
    }

    /// Creates a plug and parents it to `parent`, a node or compound plug.
    pub fn add_plug(
        &mut self,
        parent: ComponentId,
        descriptor: PlugDescriptor,
    ) -> Result<PlugId, GraphError> {
        self.attach_new_plug(parent, &descriptor)
    }

    fn attach_new_plug(
        &mut self,
        parent: ComponentId,
        descriptor: &PlugDescriptor,
    ) -> Result<PlugId, GraphError> {
        let plug = self.create_plug(descriptor)?;
        if let Err(err) = self.add_child(parent, plug.0) {
            self.destroy(plug.0);
            return Err(err);
        }
        Ok(plug)
    }

    // --- parenting ---

    fn check_relationship(&self, parent: ComponentId, child: ComponentId) -> Result<(), GraphError> {
        let reject = |reason: &'static str| {
            tracing::debug!(?parent, ?child, reason, "relationship rejected");
            GraphError::RelationshipRejected {
                parent,
                child,
                reason,
            }
        };
        let p = self.component(parent)?;
        let c = self.component(child)?;
        if parent == child {
            return Err(reject("a component cannot parent itself"));
        }
        if child == self.root.0 {
            return Err(reject("the root cannot be reparented"));
        }
        if self.is_ancestor_of(child, parent) {
            return Err(reject("the child is an ancestor of the parent"));
        }
        match (&p.data, &c.data) {
            (ComponentData::Plug(_), ComponentData::Node(_)) => {
                return Err(reject("plugs cannot hold nodes"));
            }
            (ComponentData::Plug(pd), ComponentData::Plug(cd)) => {
                if pd.plug_type != PlugType::Compound {
                    return Err(reject("only compound plugs hold children"));
                }
                if pd.direction != cd.direction {
                    return Err(reject("child plug direction differs from its parent"));
                }
            }
            (ComponentData::Node(_), ComponentData::Plug(_)) if parent == self.root.0 => {
                return Err(reject("the root holds no plugs"));
            }
            _ => {}
        }
        if let ComponentData::Node(data) = &p.data
            && !data.kind.accepts_child(self, NodeId(parent), child)
        {
            return Err(reject("the parent refused the child"));
        }
        if let ComponentData::Node(data) = &c.data
            && !data.kind.accepts_parent(self, NodeId(child), parent)
        {
            return Err(reject("the child refused the parent"));
        }
        Ok(())
    }

    /// Parents `child` to `parent`, detaching it from any previous parent.
    ///
    /// If a sibling already uses the child's name, the child is renamed with
    /// a numeric suffix one past the highest already in use for that stem:
    /// `foo`, `foo1`, `foo2`. Returns the name the child ends up with.
    ///
    /// A move emits `parent_changing`, `child_removed` on the old parent,
    /// `name_changed` if renamed, `child_added`, then `parent_changed`.
    pub fn add_child(&mut self, parent: ComponentId, child: ComponentId) -> Result<String, GraphError> {
        let mut scope = self.dirty_propagation_scope();
        scope.reparent(parent, child)
    }

    fn reparent(&mut self, parent: ComponentId, child: ComponentId) -> Result<String, GraphError> {
        self.check_relationship(parent, child)?;
        let old_parent = self.component(child)?.parent;
        if old_parent == Some(parent) {
            return Ok(self.name(child)?.to_owned());
        }

        if let Some(old) = old_parent {
            // Dirtied while the old node's affects edges still reach it.
            self.dirty_leaves(child);
            self.signals.parent_changing.emit(&ParentChanged {
                child,
                old_parent,
                new_parent: Some(parent),
            });
            self.detach(old, child)?;
            self.signals.child_removed.emit(&ChildChanged { parent: old, child });
        }

        let old_name = self.component(child)?.name.clone();
        let name = self.unique_name(parent, &old_name, None)?;
        let renamed = *name != *old_name;
        {
            let component = self.component_mut(child)?;
            component.parent = Some(parent);
            if renamed {
                component.name = Arc::from(name.as_str());
            }
        }
        self.component_mut(parent)?.children.push(child);

        if renamed {
            self.signals.name_changed.emit(&NameChanged {
                component: child,
                old_name,
            });
        }
        self.signals.child_added.emit(&ChildChanged { parent, child });
        self.signals.parent_changed.emit(&ParentChanged {
            child,
            old_parent,
            new_parent: Some(parent),
        });

        if self.as_plug(child).is_some() {
            if let Some(node) = old_parent.and_then(|old| self.owning_node(old)) {
                self.rebuild_affects(node)?;
            }
            if let Some(node) = self.owning_node(parent) {
                self.rebuild_affects(node)?;
            }
            self.dirty_leaves(child);
        }
        Ok(name)
    }

    /// Dirties every leaf plug at or below `id`, if `id` is a plug that
    /// belongs to a node.
    fn dirty_leaves(&mut self, id: ComponentId) {
        if self.as_plug(id).is_none() || self.owning_node(id).is_none() {
            return;
        }
        let leaves: Vec<PlugId> = self
            .subtree(id)
            .into_iter()
            .filter(|&c| self.component(c).is_ok_and(|c| c.children.is_empty()))
            .filter_map(|c| self.as_plug(c))
            .collect();
        let mut scope = self.dirty_propagation_scope();
        for leaf in leaves {
            scope.dirty(leaf);
        }
    }

    fn detach(&mut self, parent: ComponentId, child: ComponentId) -> Result<(), GraphError> {
        self.component_mut(parent)?.children.retain(|&c| c != child);
        self.component_mut(child)?.parent = None;
        Ok(())
    }

    /// Removes and destroys `child` and everything below it.
    ///
    /// Connections between the removed subtree and the rest of the graph are
    /// broken first, with the usual `input_changed` and dirty notifications.
    /// Every id in the subtree is stale afterwards.
    pub fn remove_child(&mut self, parent: ComponentId, child: ComponentId) -> Result<(), GraphError> {
        self.component(parent)?;
        if self.component(child)?.parent != Some(parent) {
            return Err(GraphError::NotAChild { parent, child });
        }

        let subtree = self.subtree(child);
        let inside: HashSet<ComponentId> = subtree.iter().copied().collect();
        {
            let mut scope = self.dirty_propagation_scope();
            scope.dirty_leaves(child);
            for &id in &subtree {
                let Some(plug) = scope.as_plug(id) else {
                    continue;
                };
                let data = scope.plug_data(plug)?;
                let input = data.input.filter(|up| !inside.contains(&up.0));
                let outputs: Vec<PlugId> = data
                    .outputs
                    .iter()
                    .copied()
                    .filter(|down| !inside.contains(&down.0))
                    .collect();
                if input.is_some() {
                    scope.connect(plug, None)?;
                }
                for down in outputs {
                    scope.connect(down, None)?;
                }
            }
        }

        self.signals.parent_changing.emit(&ParentChanged {
            child,
            old_parent: Some(parent),
            new_parent: None,
        });
        self.detach(parent, child)?;
        self.signals.child_removed.emit(&ChildChanged { parent, child });
        self.signals.parent_changed.emit(&ParentChanged {
            child,
            old_parent: Some(parent),
            new_parent: None,
        });

        let plug_removed = self.as_plug(child).is_some();
        self.destroy(child);
        if plug_removed && let Some(node) = self.owning_node(parent) {
            self.rebuild_affects(node)?;
        }
        Ok(())
    }

    /// Removes every child of `parent`.
    pub fn clear_children(&mut self, parent: ComponentId) -> Result<(), GraphError> {
        let children = self.component(parent)?.children.clone();
        for child in children {
            self.remove_child(parent, child)?;
        }
        Ok(())
    }

    /// Parents `child` to `parent` under exactly `name`, first removing any
    /// other child already called `name`.
    pub fn set_child(
        &mut self,
        parent: ComponentId,
        name: &str,
        child: ComponentId,
    ) -> Result<String, GraphError> {
        validate_name(name)?;
        self.check_relationship(parent, child)?;
        if let Ok(existing) = self.child(parent, name) {
            if existing == child {
                return Ok(name.to_owned());
            }
            self.remove_child(parent, existing)?;
        }
        if self.component(child)?.parent == Some(parent) {
            return self.set_name(child, name);
        }
        self.rename(child, name)?;
        self.add_child(parent, child)
    }

    /// Destroys a component and its subtree without notifications. The
    /// caller has already detached it.
    pub(crate) fn destroy(&mut self, id: ComponentId) {
        for component in self.subtree(id).into_iter().rev() {
            if let Some(plug) = self.as_plug(component) {
                self.dependencies.remove_key(plug);
                self.propagation.forget(plug);
            }
            self.release(component);
        }
    }

    /// `id` and every component below it, parents before children.
    pub(crate) fn subtree(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Ok(component) = self.component(current) else {
                continue;
            };
            out.push(current);
            stack.extend(component.children.iter().rev().copied());
        }
        out
    }

    // --- naming ---

    fn unique_name(
        &self,
        parent: ComponentId,
        name: &str,
        exclude: Option<ComponentId>,
    ) -> Result<String, GraphError> {
        let siblings: Vec<&str> = self
            .component(parent)?
            .children
            .iter()
            .filter(|&&c| Some(c) != exclude)
            .filter_map(|&c| self.component(c).ok())
            .map(|c| &*c.name)
            .collect();
        if !siblings.contains(&name) {
            return Ok(name.to_owned());
        }
        let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
        let used: HashSet<u64> = siblings
            .iter()
            .filter_map(|sibling| sibling.strip_prefix(stem))
            .filter_map(|suffix| {
                if suffix.is_empty() {
                    Some(0)
                } else if suffix.bytes().all(|b| b.is_ascii_digit()) {
                    suffix.parse::<u64>().ok()
                } else {
                    None
                }
            })
            .collect();
        let highest = used.iter().copied().max().unwrap_or(0);
        // Past `u64::MAX`, take the lowest suffix still free.
        let suffix = highest
            .checked_add(1)
            .or_else(|| (1..=u64::MAX).find(|n| !used.contains(n)))
            .ok_or_else(|| GraphError::InvalidName(name.to_owned()))?;
        Ok(format!("{stem}{suffix}"))
    }

    fn rename(&mut self, id: ComponentId, name: &str) -> Result<(), GraphError> {
        if *self.component(id)?.name == *name {
            return Ok(());
        }
        let mut scope = self.dirty_propagation_scope();
        scope.dirty_leaves(id);
        let old_name = core::mem::replace(&mut scope.component_mut(id)?.name, Arc::from(name));
        scope.signals.name_changed.emit(&NameChanged {
            component: id,
            old_name,
        });
        // Kinds find their plugs by name, so the affects edges may change.
        if scope.as_plug(id).is_some()
            && let Some(node) = scope.owning_node(id)
        {
            scope.rebuild_affects(node)?;
        }
        scope.dirty_leaves(id);
        Ok(())
    }

    /// The component's name, unique among its siblings.
    pub fn name(&self, id: ComponentId) -> Result<&str, GraphError> {
        Ok(&self.component(id)?.name)
    }

    /// Renames a component, adding a numeric suffix if a sibling already
    /// uses `name`. Returns the name actually assigned.
    pub fn set_name(&mut self, id: ComponentId, name: &str) -> Result<String, GraphError> {
        validate_name(name)?;
        let assigned = match self.component(id)?.parent {
            Some(parent) => self.unique_name(parent, name, Some(id))?,
            None => name.to_owned(),
        };
        self.rename(id, &assigned)?;
        Ok(assigned)
    }

    /// Dot-separated path from just below the root, for example
    /// `"box.node.plug"`. The root's own name is never included.
    pub fn full_name(&self, id: ComponentId) -> Result<String, GraphError> {
        self.component(id)?;
        let mut names: Vec<&str> = iter::once(id)
            .chain(self.ancestors(id))
            .filter(|&c| c != self.root.0)
            .filter_map(|c| self.component(c).ok())
            .map(|c| &*c.name)
            .collect();
        names.reverse();
        Ok(names.join("."))
    }

    /// Dot-separated path from `ancestor` down to `id`, excluding
    /// `ancestor`. Empty when `id == ancestor`.
    pub fn relative_name(&self, id: ComponentId, ancestor: ComponentId) -> Result<String, GraphError> {
        self.component(ancestor)?;
        let mut names = Vec::new();
        let mut current = id;
        while current != ancestor {
            let component = self.component(current)?;
            names.push(&*component.name);
            current = component.parent.ok_or(GraphError::NotAnAncestor {
                component: id,
                ancestor,
            })?;
        }
        names.reverse();
        Ok(names.join("."))
    }

    // --- queries ---

    /// The parent, `None` for the root and for unparented components.
    pub fn parent(&self, id: ComponentId) -> Result<Option<ComponentId>, GraphError> {
        Ok(self.component(id)?.parent)
    }

    /// Children in insertion order.
    pub fn children(&self, id: ComponentId) -> Result<&[ComponentId], GraphError> {
        Ok(&self.component(id)?.children)
    }

    /// The child called `name`.
    pub fn child(&self, parent: ComponentId, name: &str) -> Result<ComponentId, GraphError> {
        self.component(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.component(c).is_ok_and(|c| &*c.name == name))
            .ok_or_else(|| GraphError::NotFound(name.to_owned()))
    }

    /// The child at `index` in insertion order.
    pub fn child_at(&self, parent: ComponentId, index: usize) -> Result<ComponentId, GraphError> {
        self.component(parent)?
            .children
            .get(index)
            .copied()
            .ok_or_else(|| GraphError::NotFound(format!("#{index}")))
    }

    /// Follows a dot-separated path of child names down from `parent`.
    pub fn descendant(&self, parent: ComponentId, path: &str) -> Result<ComponentId, GraphError> {
        path.split('.').try_fold(parent, |current, name| {
            self.child(current, name)
                .map_err(|_| GraphError::NotFound(path.to_owned()))
        })
    }

    /// The plug child called `name`, if there is one.
    #[must_use]
    pub fn child_plug(&self, parent: impl Into<ComponentId>, name: &str) -> Option<PlugId> {
        self.child(parent.into(), name)
            .ok()
            .and_then(|c| self.as_plug(c))
    }

    /// Plug children, in insertion order.
    pub fn plugs(&self, parent: impl Into<ComponentId>) -> impl Iterator<Item = PlugId> + '_ {
        self.children(parent.into())
            .unwrap_or_default()
            .iter()
            .filter_map(|&c| self.as_plug(c))
    }

    /// Node children, in insertion order.
    pub fn child_nodes(&self, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(parent.0)
            .unwrap_or_default()
            .iter()
            .filter_map(|&c| self.as_node(c))
    }

    /// Proper ancestors, nearest first.
    pub(crate) fn ancestors(&self, id: ComponentId) -> impl Iterator<Item = ComponentId> + '_ {
        let first = self.component(id).ok().and_then(|c| c.parent);
        iter::successors(first, |&c| self.component(c).ok().and_then(|c| c.parent))
    }

    /// The nearest proper ancestor satisfying `predicate`.
    pub fn ancestor(
        &self,
        id: ComponentId,
        predicate: impl Fn(&Self, ComponentId) -> bool,
    ) -> Result<Option<ComponentId>, GraphError> {
        self.component(id)?;
        Ok(self.ancestors(id).find(|&a| predicate(self, a)))
    }

    /// The node a plug belongs to: its nearest node ancestor.
    pub fn node_of(&self, plug: PlugId) -> Result<Option<NodeId>, GraphError> {
        self.plug_data(plug)?;
        Ok(self.ancestors(plug.0).find_map(|a| self.as_node(a)))
    }

    /// `id` itself if it is a node, otherwise its nearest node ancestor.
    pub(crate) fn owning_node(&self, id: ComponentId) -> Option<NodeId> {
        self.as_node(id)
            .or_else(|| self.ancestors(id).find_map(|a| self.as_node(a)))
    }

    /// Returns `true` if `ancestor` is a proper ancestor of `id`.
    #[must_use]
    pub fn is_ancestor_of(&self, ancestor: ComponentId, id: ComponentId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// The nearest component that is a proper ancestor of both `a` and `b`
    /// and satisfies `predicate`.
    pub fn common_ancestor(
        &self,
        a: ComponentId,
        b: ComponentId,
        predicate: impl Fn(&Self, ComponentId) -> bool,
    ) -> Result<Option<ComponentId>, GraphError> {
        self.component(a)?;
        self.component(b)?;
        let candidates: HashSet<ComponentId> = self.ancestors(a).collect();
        Ok(self
            .ancestors(b)
            .find(|c| candidates.contains(c) && predicate(self, *c)))
    }
}
