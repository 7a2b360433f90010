// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Notifications emitted by a [`Graph`](crate::Graph).

use std::sync::Arc;

use trellis_signal::Signal;

use crate::ids::{ComponentId, PlugId};

/// A component was renamed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameChanged {
    /// The renamed component.
    pub component: ComponentId,
    /// Its previous name.
    pub old_name: Arc<str>,
}

/// A child was added to or removed from a parent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChildChanged {
    /// The parent.
    pub parent: ComponentId,
    /// The child.
    pub child: ComponentId,
}

/// A component is about to move, or has moved, between parents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParentChanged {
    /// The moving component.
    pub child: ComponentId,
    /// Parent before the move.
    pub old_parent: Option<ComponentId>,
    /// Parent after the move. `None` when the component is being removed.
    pub new_parent: Option<ComponentId>,
}

/// The signals a graph emits.
///
/// Every signal fires after the mutation it reports has completed, except
/// [`parent_changing`](Self::parent_changing), which fires before a component
/// leaves its parent. Slots run synchronously on the mutating thread while
/// the graph is mutably borrowed, so they observe the ids in the event and
/// must not call back into the graph.
#[derive(Debug, Default)]
pub struct GraphSignals {
    /// A component was renamed.
    pub name_changed: Signal<NameChanged>,
    /// A child was attached.
    pub child_added: Signal<ChildChanged>,
    /// A child was detached.
    pub child_removed: Signal<ChildChanged>,
    /// A component is about to leave its parent.
    pub parent_changing: Signal<ParentChanged>,
    /// A component has changed parent.
    pub parent_changed: Signal<ParentChanged>,
    /// A plug became dirty. Fires once per plug per propagation wave,
    /// upstream plugs first.
    pub plug_dirtied: Signal<PlugId>,
    /// A static value was set.
    pub plug_set: Signal<PlugId>,
    /// An input plug was connected or disconnected.
    pub input_changed: Signal<PlugId>,
}
