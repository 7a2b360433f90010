// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use trellis_context::{Cancelled, ValueType};

use crate::ids::{ComponentId, PlugId};
use crate::plug::PlugType;

/// A structural request was refused.
///
/// Structural errors are reported synchronously by the call that caused them
/// and leave the graph unchanged.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Names must match `[A-Za-z_][A-Za-z_0-9]*`.
    #[error("invalid name {0:?}")]
    InvalidName(String),
    /// Parent or child refused the relationship.
    #[error("cannot parent {child:?} to {parent:?}: {reason}")]
    RelationshipRejected {
        /// The would-be parent.
        parent: ComponentId,
        /// The would-be child.
        child: ComponentId,
        /// Why it was refused.
        reason: &'static str,
    },
    /// `remove_child` was given something that is not a child.
    #[error("{child:?} is not a child of {parent:?}")]
    NotAChild {
        /// The parent that was asked.
        parent: ComponentId,
        /// The component that is not its child.
        child: ComponentId,
    },
    /// A lookup by name found nothing.
    #[error("no child named {0:?}")]
    NotFound(String),
    /// `relative_name` was given something that is not an ancestor.
    #[error("{ancestor:?} is not an ancestor of {component:?}")]
    NotAnAncestor {
        /// The component being named.
        component: ComponentId,
        /// The supposed ancestor.
        ancestor: ComponentId,
    },
    /// The id refers to a component that has been removed.
    #[error("stale component id {0:?}")]
    StaleId(ComponentId),
    /// A node was expected where a plug was given, or vice versa.
    #[error("{id:?} is not a {expected}")]
    WrongKind {
        /// The offending id.
        id: ComponentId,
        /// `"node"` or `"plug"`.
        expected: &'static str,
    },
    /// The destination plug or its node refused the input.
    #[error("input to {plug:?} rejected: {reason}")]
    InputRejected {
        /// The destination plug.
        plug: PlugId,
        /// Why it was refused.
        reason: &'static str,
    },
    /// The types cannot be connected or converted.
    #[error("cannot convert {from} to {to}")]
    TypeMismatch {
        /// Upstream or offered type.
        from: PlugType,
        /// Destination type.
        to: PlugType,
    },
    /// Only unconnected input plugs hold static values.
    #[error("{0:?} cannot hold a static value")]
    NotSettable(PlugId),
    /// The connection would make a plug depend on itself.
    #[error("connecting {destination:?} to {upstream:?} would create a cycle")]
    Cycle {
        /// The input being connected.
        destination: PlugId,
        /// The output it would be connected to.
        upstream: PlugId,
    },
}

/// A node failed to hash or compute a value.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ComputeError {
    /// Raised by node code.
    #[error("{0}")]
    Failed(String),
    /// The node appended nothing to the hasher for this output.
    #[error("{node_type} does not implement hash() for {plug}")]
    HashNotImplemented {
        /// Full name of the output.
        plug: String,
        /// The node's type name.
        node_type: &'static str,
    },
    /// The node has no compute for this output.
    #[error("{node_type} does not implement compute() for {plug}")]
    ComputeNotImplemented {
        /// Full name of the output.
        plug: String,
        /// The node's type name.
        node_type: &'static str,
    },
    /// A value could not be converted to the plug's type.
    #[error("cannot store a {from} value in {plug} ({to})")]
    TypeMismatch {
        /// Full name of the plug.
        plug: String,
        /// Type of the offered value.
        from: ValueType,
        /// Type of the plug.
        to: PlugType,
    },
    /// Structural error hit during evaluation.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ComputeError {
    /// Shorthand for [`ComputeError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Why `get_value` or `hash` did not produce a result.
///
/// Cancellation is kept apart from failures: a cancelled evaluation did not
/// fail, it was abandoned, and retrying it in a live context may succeed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The context's canceller fired.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    /// A node failed.
    #[error(transparent)]
    Compute(#[from] ComputeError),
}

impl From<GraphError> for EvalError {
    fn from(err: GraphError) -> Self {
        Self::Compute(ComputeError::Graph(err))
    }
}

impl EvalError {
    /// Returns `true` for [`EvalError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
