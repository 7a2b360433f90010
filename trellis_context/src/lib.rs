// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Context: values, content hashes and evaluation contexts.
//!
//! A [`Context`] is the environment a plug is evaluated in: the frame, a
//! tile index, any named variable a node cares about. Contexts are immutable
//! once shared; editing one produces a new logical context without touching
//! the original.
//!
//! - [`Value`]: the dynamically typed values plugs and variables carry.
//! - [`ContentHash`] / [`ContentHasher`]: 256-bit hashes that stand in for
//!   values when probing caches.
//! - [`Scope`] / [`EditableScope`]: make a context current on this thread,
//!   restoring the previous one on drop.
//! - [`record_reads`]: find out which variables some code looked at.
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis_context::{Context, ContentHasher, EditableScope, Value};
//!
//! let base = Context::new().with("scale", 2.0);
//!
//! {
//!     let mut scope = EditableScope::from_context(&base);
//!     scope.set("scale", 3.0);
//!     let current = Context::current();
//!     assert_eq!(current.get("scale"), Some(&Value::Float(3.0)));
//!     assert_ne!(current.hash(), base.hash());
//! }
//!
//! let mut h = ContentHasher::new();
//! h.append(&base.hash()).append("multiply");
//! let key = h.finish();
//! assert_eq!(key.to_string().len(), 64);
//! ```

mod context;
mod hash;
mod reads;
mod scope;
mod value;

pub use context::{Context, UI_PREFIX};
pub use hash::{ContentHash, ContentHasher, Hashable};
pub use reads::record_reads;
pub use scope::{EditableScope, Scope};
pub use value::{Value, ValueType};

pub use trellis_task_mutex::{Cancelled, Canceller};
