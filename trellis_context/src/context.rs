// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use trellis_task_mutex::{Cancelled, Canceller};

use crate::hash::{ContentHash, ContentHasher};
use crate::reads;
use crate::value::Value;

/// Prefix of variables that never take part in [`Context::hash`].
pub const UI_PREFIX: &str = "ui:";

const FRAME: &str = "frame";
const FRAMES_PER_SECOND: &str = "framesPerSecond";

/// An immutable name to value map that parameterizes evaluation.
///
/// Cloning is cheap: clones share storage until one of them is edited, at
/// which point the edited clone copies it. A context handed to another thread
/// is therefore never changed underneath that thread.
///
/// The content hash is computed on first use and remembered. Variables whose
/// names start with [`UI_PREFIX`] are excluded from it, so UI state can ride
/// along without invalidating caches.
///
/// ```
/// use trellis_context::Context;
///
/// let mut a = Context::new();
/// a.set_frame(10.0);
/// let mut b = a.clone();
/// b.set("ui:selection", "/node");
/// assert_eq!(a.hash(), b.hash());
///
/// b.set_frame(11.0);
/// assert_ne!(a.hash(), b.hash());
/// assert_eq!(a.frame(), 10.0);
/// ```
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextData>,
}

#[derive(Clone, Default)]
struct ContextData {
    variables: BTreeMap<Arc<str>, Value>,
    hash: OnceLock<ContentHash>,
    canceller: Option<Canceller>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(&mut self) -> &mut ContextData {
        let data = Arc::make_mut(&mut self.inner);
        data.hash = OnceLock::new();
        data
    }

    /// Sets a variable, replacing any previous value.
    pub fn set(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) {
        self.edit().variables.insert(name.into(), value.into());
    }

    /// Returns a copy with `name` set to `value`.
    #[must_use]
    pub fn with(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Removes a variable, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        if !self.inner.variables.contains_key(name) {
            return None;
        }
        self.edit().variables.remove(name)
    }

    /// Returns a variable.
    ///
    /// The read is visible to an enclosing [`record_reads`](crate::record_reads)
    /// on this thread, whether or not the variable exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        reads::note(name);
        self.inner.variables.get(name)
    }

    /// Returns a variable, or `default` when it is missing.
    #[must_use]
    pub fn get_or(&self, name: &str, default: impl Into<Value>) -> Value {
        self.get(name).cloned().unwrap_or_else(|| default.into())
    }

    /// Returns `true` if `name` is set. Not recorded as a read.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.variables.contains_key(name)
    }

    /// Iterates over variable names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.variables.keys().map(|k| &**k)
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.variables.len()
    }

    /// Returns `true` if no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.variables.is_empty()
    }

    /// Returns the content hash of all variables outside the `ui:` namespace.
    ///
    /// Hashing does not count as reading variables.
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        *self.inner.hash.get_or_init(|| {
            let mut h = ContentHasher::new();
            h.append("context");
            for (name, value) in &self.inner.variables {
                if name.starts_with(UI_PREFIX) {
                    continue;
                }
                h.append(name).append(value);
            }
            h.finish()
        })
    }

    /// The current frame, 1 when unset.
    #[must_use]
    pub fn frame(&self) -> f64 {
        self.get(FRAME).and_then(Value::as_float).unwrap_or(1.0)
    }

    /// Sets the current frame.
    pub fn set_frame(&mut self, frame: f64) {
        self.set(FRAME, frame);
    }

    /// Frames per second, 24 when unset.
    #[must_use]
    pub fn frames_per_second(&self) -> f64 {
        self.get(FRAMES_PER_SECOND)
            .and_then(Value::as_float)
            .unwrap_or(24.0)
    }

    /// Sets the frame rate.
    pub fn set_frames_per_second(&mut self, fps: f64) {
        self.set(FRAMES_PER_SECOND, fps);
    }

    /// Time in seconds: frame divided by frame rate.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.frame() / self.frames_per_second()
    }

    /// Sets the frame so that [`time`](Self::time) returns `seconds`.
    pub fn set_time(&mut self, seconds: f64) {
        let fps = self.frames_per_second();
        self.set_frame(seconds * fps);
    }

    /// The cancellation token evaluations in this context observe.
    ///
    /// The canceller is not a variable: it takes no part in hashing or
    /// equality.
    #[must_use]
    pub fn canceller(&self) -> Option<&Canceller> {
        self.inner.canceller.as_ref()
    }

    /// Attaches a cancellation token.
    pub fn set_canceller(&mut self, canceller: Option<Canceller>) {
        // Leaves the hash cell alone; the canceller is not hashed.
        Arc::make_mut(&mut self.inner).canceller = canceller;
    }

    /// Returns a copy carrying `canceller`.
    #[must_use]
    pub fn with_canceller(mut self, canceller: Canceller) -> Self {
        self.set_canceller(Some(canceller));
        self
    }

    /// Returns `Err(Cancelled)` once the attached canceller has fired.
    pub fn check_cancellation(&self) -> Result<(), Cancelled> {
        match &self.inner.canceller {
            Some(c) => c.check(),
            None => Ok(()),
        }
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.variables == other.inner.variables
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("variables", &self.inner.variables)
            .field("cancellable", &self.inner.canceller.is_some())
            .finish_non_exhaustive()
    }
}
