// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording which context variables a piece of code reads.

use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static FRAMES: RefCell<Vec<Vec<Arc<str>>>> = const { RefCell::new(Vec::new()) };
}

/// Notes a read in the innermost recording frame, if any.
pub(crate) fn note(name: &str) {
    // `try_with`: reads during thread teardown are simply not recorded.
    let _ = FRAMES.try_with(|frames| {
        let mut frames = frames.borrow_mut();
        let Some(top) = frames.last_mut() else {
            return;
        };
        if !top.iter().any(|n| &**n == name) {
            top.push(Arc::from(name));
        }
    });
}

struct Frame {
    depth: usize,
}

impl Frame {
    fn push() -> Self {
        FRAMES.with_borrow_mut(|frames| {
            frames.push(Vec::new());
            Self { depth: frames.len() }
        })
    }

    fn take(self) -> Vec<Arc<str>> {
        let names = FRAMES.with_borrow_mut(|frames| {
            debug_assert_eq!(frames.len(), self.depth, "recordings must nest");
            frames.pop().unwrap_or_default()
        });
        core::mem::forget(self);
        names
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // Unwinding out of `f`.
        let _ = FRAMES.try_with(|frames| frames.borrow_mut().truncate(self.depth - 1));
    }
}

/// Runs `f` and returns the names of context variables it read on this
/// thread, in first-read order without duplicates.
///
/// Recordings nest, and each one is isolated: reads made inside an inner
/// recording are reported to that recording only. Reads made on other
/// threads (for example by spawned subtasks) are not seen.
///
/// ```
/// use trellis_context::{Context, record_reads};
///
/// let context = Context::new().with("a", 1).with("b", 2);
/// let (sum, reads) = record_reads(|| {
///     let a = context.get("a").and_then(|v| v.as_int()).unwrap_or(0);
///     let c = context.get("c").and_then(|v| v.as_int()).unwrap_or(0);
///     a + c
/// });
/// assert_eq!(sum, 1);
/// assert_eq!(reads.iter().map(|n| &**n).collect::<Vec<_>>(), ["a", "c"]);
/// ```
pub fn record_reads<R>(f: impl FnOnce() -> R) -> (R, Vec<Arc<str>>) {
    let frame = Frame::push();
    let result = f();
    (result, frame.take())
}
