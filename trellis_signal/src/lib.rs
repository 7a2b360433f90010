// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Signal: synchronous observer lists.
//!
//! A [`Signal`] owns an ordered list of slots. [`Signal::emit`] invokes every
//! connected, unblocked slot on the calling thread, in registration order.
//! Connecting returns a [`Connection`] handle, which is the only way to
//! disconnect or block that slot; dropping the handle leaves the slot
//! connected. Wrap it in a [`ScopedConnection`] to tie the slot's lifetime to
//! a scope instead.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use trellis_signal::Signal;
//!
//! let renamed = Signal::<String>::new();
//! let count = Arc::new(AtomicUsize::new(0));
//!
//! let c = count.clone();
//! let connection = renamed.connect(move |_name: &String| {
//!     c.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! renamed.emit(&"a".to_string());
//! {
//!     let _blocked = connection.block();
//!     renamed.emit(&"b".to_string());
//! }
//! connection.disconnect();
//! renamed.emit(&"c".to_string());
//!
//! assert_eq!(count.load(Ordering::Relaxed), 1);
//! ```
//!
//! ## Re-entrancy
//!
//! Slots are `Fn`, so a slot may emit the signal that invoked it, connect new
//! slots, or disconnect itself. Emission iterates a snapshot taken when
//! `emit` starts: slots connected during emission are first called on the
//! next emission, and slots disconnected during emission are not called
//! again once the disconnect has happened.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

type Callback<A> = dyn Fn(&A) + Send + Sync;

#[derive(Debug, Default)]
struct SlotState {
    disconnected: AtomicBool,
    blocked: AtomicUsize,
}

impl SlotState {
    fn live(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }
}

struct Slot<A> {
    callback: Arc<Callback<A>>,
    state: Arc<SlotState>,
}

impl<A> Clone for Slot<A> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            state: self.state.clone(),
        }
    }
}

/// An ordered list of observers for events of type `A`.
pub struct Signal<A> {
    slots: Mutex<Vec<Slot<A>>>,
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slot_count())
            .finish_non_exhaustive()
    }
}

impl<A> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Signal<A> {
    /// Creates a signal with no slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Appends `slot` to the observer list.
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let state = Arc::new(SlotState::default());
        let mut slots = self.slots.lock();
        slots.retain(|s| s.state.live());
        slots.push(Slot {
            callback: Arc::new(slot),
            state: state.clone(),
        });
        Connection { state }
    }

    /// Calls every connected, unblocked slot with `args`, in registration order.
    pub fn emit(&self, args: &A) {
        let snapshot: Vec<Slot<A>> = self.slots.lock().clone();
        for slot in snapshot {
            if slot.state.live() && slot.state.blocked.load(Ordering::Acquire) == 0 {
                (slot.callback)(args);
            }
        }
    }

    /// Returns the number of connected slots, blocked or not.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.state.live()).count()
    }

    /// Returns `true` if no slot is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot_count() == 0
    }

    /// Disconnects every slot.
    pub fn disconnect_all(&self) {
        for slot in self.slots.lock().drain(..) {
            slot.state.disconnected.store(true, Ordering::Release);
        }
    }
}

/// Handle to one connected slot.
///
/// Cloning a connection yields another handle to the same slot.
#[derive(Clone, Debug)]
pub struct Connection {
    state: Arc<SlotState>,
}

impl Connection {
    /// Disconnects the slot. Disconnecting twice is harmless.
    pub fn disconnect(&self) {
        self.state.disconnected.store(true, Ordering::Release);
    }

    /// Returns `true` while the slot is connected.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.state.live()
    }

    /// Blocks the slot until the returned guard is dropped.
    ///
    /// Blocks nest: the slot runs again once every guard is gone.
    #[must_use = "the slot is unblocked as soon as the guard is dropped"]
    pub fn block(&self) -> BlockGuard {
        self.state.blocked.fetch_add(1, Ordering::AcqRel);
        BlockGuard {
            state: self.state.clone(),
        }
    }

    /// Returns `true` if at least one [`BlockGuard`] is alive for this slot.
    #[must_use]
    pub fn blocked(&self) -> bool {
        self.state.blocked.load(Ordering::Acquire) > 0
    }

    /// Converts this handle into one that disconnects on drop.
    #[must_use]
    pub fn scoped(self) -> ScopedConnection {
        ScopedConnection { connection: self }
    }
}

/// Keeps a slot blocked while alive.
#[derive(Debug)]
pub struct BlockGuard {
    state: Arc<SlotState>,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        self.state.blocked.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A [`Connection`] that disconnects its slot when dropped.
#[derive(Debug)]
pub struct ScopedConnection {
    connection: Connection,
}

impl ScopedConnection {
    /// Returns the underlying connection handle.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn slots_run_in_registration_order() {
        let signal = Signal::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let log = log.clone();
            let _ = signal.connect(move |v: &u32| log.lock().push((tag, *v)));
        }
        signal.emit(&7);

        assert_eq!(*log.lock(), vec![("a", 7), ("b", 7), ("c", 7)]);
    }

    #[test]
    fn scoped_connection_disconnects_on_drop() {
        let signal = Signal::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let h = hits.clone();
            let _scoped = signal
                .connect(move |()| {
                    h.fetch_add(1, Ordering::Relaxed);
                })
                .scoped();
            signal.emit(&());
        }
        signal.emit(&());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(signal.is_empty());
    }

    #[test]
    fn nested_blocks_release_in_order() {
        let signal = Signal::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let connection = signal.connect(move |()| {
            h.fetch_add(1, Ordering::Relaxed);
        });

        let outer = connection.block();
        let inner = connection.block();
        drop(inner);
        signal.emit(&());
        assert!(connection.blocked());
        drop(outer);
        signal.emit(&());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn slot_may_disconnect_itself_during_emit() {
        let signal = Arc::new(Signal::<()>::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let handle: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));

        let h = hits.clone();
        let me = handle.clone();
        let connection = signal.connect(move |()| {
            h.fetch_add(1, Ordering::Relaxed);
            if let Some(c) = me.lock().as_ref() {
                c.disconnect();
            }
        });
        *handle.lock() = Some(connection.clone());

        signal.emit(&());
        signal.emit(&());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(!connection.connected());
    }

    #[test]
    fn slots_connected_during_emit_wait_for_next_emit() {
        let signal = Arc::new(Signal::<()>::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let s = signal.clone();
        let h = hits.clone();
        let _ = signal.connect(move |()| {
            let h = h.clone();
            let _ = s.connect(move |()| {
                h.fetch_add(1, Ordering::Relaxed);
            });
        });

        signal.emit(&());
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        signal.emit(&());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
