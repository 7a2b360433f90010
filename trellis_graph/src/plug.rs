// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plug descriptions.

use core::fmt;

use trellis_context::{Value, ValueType};

/// Which way data flows through a plug.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receives a static value or a connection.
    In,
    /// Produced by its node.
    Out,
}

/// The type of a plug.
///
/// Leaf plugs carry one [`ValueType`]; compound plugs carry nothing
/// themselves and group child plugs of the same direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PlugType {
    /// See [`ValueType::Bool`].
    Bool,
    /// See [`ValueType::Int`].
    Int,
    /// See [`ValueType::Float`].
    Float,
    /// See [`ValueType::String`].
    String,
    /// See [`ValueType::FloatVector`].
    FloatVector,
    /// See [`ValueType::IntVector`].
    IntVector,
    /// See [`ValueType::StringVector`].
    StringVector,
    /// A group of child plugs.
    Compound,
}

impl PlugType {
    /// The value type of a leaf plug, `None` for compounds.
    #[must_use]
    pub fn value_type(self) -> Option<ValueType> {
        Some(match self {
            Self::Bool => ValueType::Bool,
            Self::Int => ValueType::Int,
            Self::Float => ValueType::Float,
            Self::String => ValueType::String,
            Self::FloatVector => ValueType::FloatVector,
            Self::IntVector => ValueType::IntVector,
            Self::StringVector => ValueType::StringVector,
            Self::Compound => return None,
        })
    }

    /// Stable lowercase name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.value_type().map_or("compound", ValueType::name)
    }

    /// Returns `true` if an output of type `upstream` may feed this type.
    ///
    /// Compounds only connect to compounds; their children are checked
    /// separately.
    #[must_use]
    pub fn accepts(self, upstream: Self) -> bool {
        match (upstream.value_type(), self.value_type()) {
            (Some(from), Some(to)) => from.converts_to(to),
            (None, None) => true,
            _ => false,
        }
    }
}

impl From<ValueType> for PlugType {
    fn from(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Bool => Self::Bool,
            ValueType::Int => Self::Int,
            ValueType::Float => Self::Float,
            ValueType::String => Self::String,
            ValueType::FloatVector => Self::FloatVector,
            ValueType::IntVector => Self::IntVector,
            ValueType::StringVector => Self::StringVector,
        }
    }
}

impl fmt::Display for PlugType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Per-plug behavior flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PlugFlags: u8 {
        /// The plug's value belongs in a saved graph.
        const SERIALISABLE   = 0b0000_0001;
        /// An input plug may be connected.
        const ACCEPTS_INPUTS = 0b0000_0010;
        /// Computed values of an output plug may be kept in the compute cache.
        const CACHEABLE      = 0b0000_0100;
    }
}

impl Default for PlugFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Everything needed to create a plug, including compound children.
///
/// ```
/// use trellis_graph::{Direction, PlugDescriptor, PlugFlags, PlugType};
///
/// let color = PlugDescriptor::compound("color", Direction::In)
///     .with_child(PlugDescriptor::input("r", PlugType::Float).with_default(1.0))
///     .with_child(PlugDescriptor::input("g", PlugType::Float))
///     .with_child(PlugDescriptor::input("b", PlugType::Float));
/// assert_eq!(color.children().len(), 3);
///
/// let locked = PlugDescriptor::input("seed", PlugType::Int)
///     .with_flags(PlugFlags::SERIALISABLE);
/// assert!(!locked.flags().contains(PlugFlags::ACCEPTS_INPUTS));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct PlugDescriptor {
    name: String,
    direction: Direction,
    plug_type: PlugType,
    default: Option<Value>,
    flags: PlugFlags,
    children: Vec<Self>,
}

impl PlugDescriptor {
    /// A plug with default flags and the type's default value.
    pub fn new(name: impl Into<String>, direction: Direction, plug_type: PlugType) -> Self {
        Self {
            name: name.into(),
            direction,
            plug_type,
            default: None,
            flags: PlugFlags::default(),
            children: Vec::new(),
        }
    }

    /// Shorthand for an [`Direction::In`] plug.
    pub fn input(name: impl Into<String>, plug_type: PlugType) -> Self {
        Self::new(name, Direction::In, plug_type)
    }

    /// Shorthand for an [`Direction::Out`] plug.
    pub fn output(name: impl Into<String>, plug_type: PlugType) -> Self {
        Self::new(name, Direction::Out, plug_type)
    }

    /// Shorthand for a compound plug.
    pub fn compound(name: impl Into<String>, direction: Direction) -> Self {
        Self::new(name, direction, PlugType::Compound)
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Replaces the flags.
    #[must_use]
    pub fn with_flags(mut self, flags: PlugFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Appends a child plug. Only meaningful for compounds.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// The requested name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The type.
    #[must_use]
    pub fn plug_type(&self) -> PlugType {
        self.plug_type
    }

    /// The explicit default, if one was given.
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// The flags.
    #[must_use]
    pub fn flags(&self) -> PlugFlags {
        self.flags
    }

    /// Child descriptors.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_types_accept_each_other() {
        assert!(PlugType::Float.accepts(PlugType::Int));
        assert!(PlugType::Bool.accepts(PlugType::Float));
        assert!(!PlugType::String.accepts(PlugType::Int));
        assert!(PlugType::Compound.accepts(PlugType::Compound));
        assert!(!PlugType::Compound.accepts(PlugType::Float));
    }

    #[test]
    fn value_types_round_trip_through_plug_types() {
        for t in [ValueType::Bool, ValueType::String, ValueType::IntVector] {
            assert_eq!(PlugType::from(t).value_type(), Some(t));
        }
        assert_eq!(PlugType::Compound.value_type(), None);
        assert_eq!(PlugType::Compound.name(), "compound");
    }
}
