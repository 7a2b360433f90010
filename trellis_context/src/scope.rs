// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The thread-current context.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::Context;
use crate::value::Value;

thread_local! {
    static CURRENT: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

impl Context {
    /// Returns the innermost context entered on this thread, or an empty
    /// context when none is.
    #[must_use]
    pub fn current() -> Self {
        CURRENT
            .with_borrow(|stack| stack.last().cloned())
            .unwrap_or_default()
    }
}

fn push(context: Context) -> usize {
    CURRENT.with_borrow_mut(|stack| {
        stack.push(context);
        stack.len()
    })
}

fn pop(depth: usize) {
    let _ = CURRENT.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        debug_assert_eq!(stack.len(), depth, "scopes must be dropped in reverse order");
        stack.truncate(depth - 1);
    });
}

/// Makes a context current on this thread until dropped.
///
/// ```
/// use trellis_context::{Context, Scope};
///
/// let c = Context::new().with("tile", 3);
/// {
///     let _scope = Scope::new(&c);
///     assert_eq!(Context::current(), c);
/// }
/// assert!(Context::current().is_empty());
/// ```
#[derive(Debug)]
#[must_use = "the context is current only while the scope is alive"]
pub struct Scope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    /// Enters `context`.
    pub fn new(context: &Context) -> Self {
        Self {
            depth: push(context.clone()),
            _not_send: PhantomData,
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        pop(self.depth);
    }
}

/// Enters a copy of the current context that can be edited in place.
///
/// Edits are visible through [`Context::current`] while the scope lives and
/// vanish when it is dropped. Contexts captured earlier are unaffected.
///
/// ```
/// use trellis_context::{Context, EditableScope};
///
/// let before = Context::current();
/// {
///     let mut scope = EditableScope::new();
///     scope.set_frame(12.0);
///     assert_eq!(Context::current().frame(), 12.0);
/// }
/// assert_eq!(Context::current(), before);
/// ```
#[derive(Debug)]
#[must_use = "edits are current only while the scope is alive"]
pub struct EditableScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl EditableScope {
    /// Enters an editable copy of [`Context::current`].
    pub fn new() -> Self {
        Self::from_context(&Context::current())
    }

    /// Enters an editable copy of `context`.
    pub fn from_context(context: &Context) -> Self {
        Self {
            depth: push(context.clone()),
            _not_send: PhantomData,
        }
    }

    fn edit<R>(&mut self, f: impl FnOnce(&mut Context) -> R) -> R {
        CURRENT.with_borrow_mut(|stack| f(&mut stack[self.depth - 1]))
    }

    /// Sets a variable.
    pub fn set(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) {
        self.edit(|c| c.set(name, value));
    }

    /// Removes a variable.
    pub fn remove(&mut self, name: &str) {
        self.edit(|c| c.remove(name));
    }

    /// Sets the frame.
    pub fn set_frame(&mut self, frame: f64) {
        self.edit(|c| c.set_frame(frame));
    }

    /// Sets the time in seconds.
    pub fn set_time(&mut self, seconds: f64) {
        self.edit(|c| c.set_time(seconds));
    }

    /// Returns the context as edited so far.
    #[must_use]
    pub fn context(&self) -> Context {
        CURRENT.with_borrow(|stack| stack[self.depth - 1].clone())
    }
}

impl Default for EditableScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EditableScope {
    fn drop(&mut self) {
        pop(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_nest_and_restore() {
        let outer = Context::new().with("a", 1);
        let _o = Scope::new(&outer);
        {
            let mut edit = EditableScope::new();
            edit.set("b", 2);
            let current = Context::current();
            assert_eq!(current.get("a"), Some(&Value::Int(1)));
            assert_eq!(current.get("b"), Some(&Value::Int(2)));
            assert!(!outer.contains("b"), "entered context is untouched");
        }
        assert_eq!(Context::current(), outer);
    }

    #[test]
    fn edits_after_capture_do_not_change_the_capture() {
        let mut edit = EditableScope::from_context(&Context::new());
        edit.set("x", 1);
        let captured = edit.context();
        edit.set("x", 2);
        assert_eq!(captured.get("x"), Some(&Value::Int(1)));
        assert_eq!(edit.context().get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn other_threads_start_empty() {
        let _s = Scope::new(&Context::new().with("x", 1));
        let seen = std::thread::spawn(|| Context::current().len())
            .join()
            .unwrap();
        assert_eq!(seen, 0);
    }
}
