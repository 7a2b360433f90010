// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Task Mutex: a lock whose waiters help instead of idling.
//!
//! [`TaskMutex`] is an upgradable reader/writer spin lock designed to guard a
//! lazily computed value in a task-parallel program. The interesting part is
//! what happens when the value is expensive and its computation is itself
//! parallel: the writer calls [`ScopedLock::execute`], which publishes a
//! [`TaskGroup`]. Every other thread that wants the same lock, instead of
//! spinning uselessly (or worse, blocking a pool thread the writer's tasks
//! need), picks up queued tasks from that group and runs them. When the queue
//! is empty it retries the lock.
//!
//! - [`ScopedLock::acquire`]: blocking acquisition with bounded exponential
//!   [`Backoff`], optionally helping with published work.
//! - [`ScopedLock::try_acquire`]: non-blocking, never helps.
//! - [`ScopedLock::acquire_or`]: one attempt, with a callback deciding whether
//!   to help. Supports [`LockType::WorkerRead`] for re-entry from inside the
//!   writer's own tasks.
//! - [`ScopedLock::upgrade_to_writer`]: reports whether the upgrade was
//!   atomic.
//! - [`ScopedLock::execute`] / [`ScopedLock::execute_cancellable`]: run work
//!   others may join. Panics surface only on the owning thread; cancellation
//!   surfaces as [`Cancelled`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use trellis_task_mutex::{ScopedLock, TaskMutex};
//!
//! let mutex = Arc::new(TaskMutex::new());
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let mutex = mutex.clone();
//!         let counter = counter.clone();
//!         std::thread::spawn(move || {
//!             for _ in 0..1000 {
//!                 let _lock = ScopedLock::locked(&mutex, true);
//!                 counter.fetch_add(1, Ordering::Relaxed);
//!             }
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(counter.load(Ordering::Relaxed), 4000);
//! ```
//!
//! ## Protocol errors
//!
//! Calling `execute` without a write lock, or `upgrade_to_writer` without a
//! plain read lock, is a programming error and panics.

mod backoff;
mod cancel;
mod group;
mod mutex;
mod rw;

pub use backoff::Backoff;
pub use cancel::{Cancelled, Canceller};
pub use group::TaskGroup;
pub use mutex::{LockType, ScopedLock, TaskMutex};
