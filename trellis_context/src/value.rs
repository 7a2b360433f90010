// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamically typed values carried by plugs and context variables.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use crate::hash::{ContentHasher, Hashable};

/// The type of a [`Value`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// `true` or `false`.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Vector of floats.
    FloatVector,
    /// Vector of integers.
    IntVector,
    /// Vector of strings.
    StringVector,
}

impl ValueType {
    /// Returns a stable lowercase name, used in hashes and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::FloatVector => "float_vector",
            Self::IntVector => "int_vector",
            Self::StringVector => "string_vector",
        }
    }

    /// Returns `true` if values of this type can be converted to `to`.
    ///
    /// The numeric scalars (`Bool`, `Int`, `Float`) convert among
    /// themselves, as do the numeric vectors. Every type converts to itself.
    #[must_use]
    pub fn converts_to(self, to: Self) -> bool {
        use ValueType::*;
        self == to
            || matches!(
                (self, to),
                (Bool | Int | Float, Bool | Int | Float) | (IntVector, FloatVector) | (FloatVector, IntVector)
            )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dynamically typed, cheaply clonable value.
///
/// Strings and vectors are reference counted, so cloning a value out of a
/// cache never copies its payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// See [`ValueType::Bool`].
    Bool(bool),
    /// See [`ValueType::Int`].
    Int(i64),
    /// See [`ValueType::Float`].
    Float(f64),
    /// See [`ValueType::String`].
    String(Arc<str>),
    /// See [`ValueType::FloatVector`].
    FloatVector(Arc<[f64]>),
    /// See [`ValueType::IntVector`].
    IntVector(Arc<[i64]>),
    /// See [`ValueType::StringVector`].
    StringVector(Arc<[Arc<str>]>),
}

impl Value {
    /// Returns the type of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::FloatVector(_) => ValueType::FloatVector,
            Self::IntVector(_) => ValueType::IntVector,
            Self::StringVector(_) => ValueType::StringVector,
        }
    }

    /// Returns the default value of `value_type`: false, zero, or empty.
    #[must_use]
    pub fn default_of(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Bool => Self::Bool(false),
            ValueType::Int => Self::Int(0),
            ValueType::Float => Self::Float(0.0),
            ValueType::String => Self::String(Arc::from("")),
            ValueType::FloatVector => Self::FloatVector(Arc::from([])),
            ValueType::IntVector => Self::IntVector(Arc::from([])),
            ValueType::StringVector => Self::StringVector(Arc::from([])),
        }
    }

    /// Approximate heap and inline size in bytes, used as the cache cost.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        size_of::<Self>()
            + match self {
                Self::Bool(_) | Self::Int(_) | Self::Float(_) => 0,
                Self::String(s) => s.len(),
                Self::FloatVector(v) => v.len() * size_of::<f64>(),
                Self::IntVector(v) => v.len() * size_of::<i64>(),
                Self::StringVector(v) => v
                    .iter()
                    .map(|s| s.len() + size_of::<Arc<str>>())
                    .sum(),
            }
    }

    /// Converts to `to`, following [`ValueType::converts_to`].
    ///
    /// Floats convert to integers by truncation toward zero; any non-zero
    /// number converts to `true`.
    #[must_use]
    pub fn convert(&self, to: ValueType) -> Option<Self> {
        if self.value_type() == to {
            return Some(self.clone());
        }
        #[expect(clippy::cast_possible_truncation, reason = "truncation is the documented conversion")]
        let converted = match (self, to) {
            (Self::Bool(b), ValueType::Int) => Self::Int(i64::from(*b)),
            (Self::Bool(b), ValueType::Float) => Self::Float(if *b { 1.0 } else { 0.0 }),
            (Self::Int(i), ValueType::Bool) => Self::Bool(*i != 0),
            (Self::Int(i), ValueType::Float) => Self::Float(*i as f64),
            (Self::Float(f), ValueType::Bool) => Self::Bool(*f != 0.0),
            (Self::Float(f), ValueType::Int) => Self::Int(*f as i64),
            (Self::IntVector(v), ValueType::FloatVector) => {
                Self::FloatVector(v.iter().map(|&i| i as f64).collect())
            }
            (Self::FloatVector(v), ValueType::IntVector) => {
                Self::IntVector(v.iter().map(|&f| f as i64).collect())
            }
            _ => return None,
        };
        Some(converted)
    }

    /// Returns the boolean, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the number as a float, if this is a `Float` or an `Int`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the string, if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the floats, if this is a `FloatVector`.
    #[must_use]
    pub fn as_float_vector(&self) -> Option<&[f64]> {
        match self {
            Self::FloatVector(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integers, if this is an `IntVector`.
    #[must_use]
    pub fn as_int_vector(&self) -> Option<&[i64]> {
        match self {
            Self::IntVector(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the strings, if this is a `StringVector`.
    #[must_use]
    pub fn as_string_vector(&self) -> Option<&[Arc<str>]> {
        match self {
            Self::StringVector(v) => Some(v),
            _ => None,
        }
    }
}

impl Hashable for Value {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.append(self.value_type().name());
        match self {
            Self::Bool(b) => hasher.append(b),
            Self::Int(i) => hasher.append(i),
            Self::Float(f) => hasher.append(f),
            Self::String(s) => hasher.append(&**s),
            Self::FloatVector(v) => hasher.append(&**v),
            Self::IntVector(v) => hasher.append(&**v),
            Self::StringVector(v) => hasher.append(&**v),
        };
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::FloatVector(v) => write!(f, "{v:?}"),
            Self::IntVector(v) => write!(f, "{v:?}"),
            Self::StringVector(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Self::FloatVector(value.into())
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Self::IntVector(value.into())
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::StringVector(value.into_iter().map(Arc::from).collect())
    }
}
