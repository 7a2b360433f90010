// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Component identifiers.

use core::fmt;

use trellis_dirty::DenseKey;

/// Identifier of a node or plug in a [`Graph`](crate::Graph).
///
/// A slot index plus a generation counter. Removing a component frees its
/// slot; when the slot is reused its generation is incremented, so an id that
/// outlived its component never aliases a different one. Operations given a
/// stale id fail with [`GraphError::StaleId`](crate::GraphError::StaleId).
///
/// Ids order by slot, then generation. Notification order relies on that
/// ordering being stable, not on it meaning anything.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    index: u32,
    generation: u32,
}

impl ComponentId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn slot(self) -> usize {
        self.index as usize
    }

    /// The generation of the slot this id refers to.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// A [`ComponentId`] known to refer to a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) ComponentId);

/// A [`ComponentId`] known to refer to a plug.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlugId(pub(crate) ComponentId);

impl NodeId {
    /// The untyped id.
    #[must_use]
    pub const fn component(self) -> ComponentId {
        self.0
    }
}

impl PlugId {
    /// The untyped id.
    #[must_use]
    pub const fn component(self) -> ComponentId {
        self.0
    }
}

impl From<NodeId> for ComponentId {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl From<PlugId> for ComponentId {
    fn from(id: PlugId) -> Self {
        id.0
    }
}

impl DenseKey for PlugId {
    fn index(self) -> usize {
        self.0.slot()
    }
}
