// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The collaborative mutex and its scoped lock.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use parking_lot::Mutex;

use crate::backoff::Backoff;
use crate::cancel::{Cancelled, Canceller};
use crate::group::TaskGroup;
use crate::rw::RawRwSpin;

/// The mode in which a [`ScopedLock`] holds its mutex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum LockType {
    /// Nothing is held.
    #[default]
    None,
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
    /// Shared access granted to a thread that is already doing work inside
    /// the holder's [`execute`](ScopedLock::execute) call.
    ///
    /// This lets work nested inside `execute` re-enter the same mutex. The
    /// write lock is still held by the owner, so a `WorkerRead` lock must
    /// never be upgraded and must not be used to publish results.
    WorkerRead,
}

/// Work published by a writer while it is inside `execute`.
#[derive(Debug)]
struct ExecutionState {
    group: TaskGroup,
}

/// An upgradable reader/writer mutex whose waiters can help the writer.
///
/// The mutex guards one logical resource, typically a lazily-initialised
/// cache slot. It holds no data itself: callers pair it with their own
/// storage and only mutate that storage while holding a write lock.
///
/// While the write-lock holder runs [`ScopedLock::execute`], the mutex
/// publishes a [`TaskGroup`]. Threads blocked in
/// [`ScopedLock::acquire`] with `accept_work` set run that group's queued
/// tasks instead of idling, then retry the lock.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use trellis_task_mutex::{ScopedLock, TaskMutex};
///
/// let mutex = TaskMutex::new();
/// let total = Arc::new(AtomicUsize::new(0));
///
/// let mut lock = ScopedLock::new();
/// lock.acquire(&mutex, true, true);
/// let t = total.clone();
/// let result = lock.execute(move |group| {
///     for i in 0..100 {
///         let t = t.clone();
///         group.spawn(move || {
///             t.fetch_add(i, Ordering::Relaxed);
///         });
///     }
///     "done"
/// });
/// assert_eq!(result, Ok("done"));
/// assert_eq!(total.load(Ordering::Relaxed), 4950);
/// lock.release();
/// ```
#[derive(Debug, Default)]
pub struct TaskMutex {
    rw: RawRwSpin,
    execution: Mutex<Option<ExecutionState>>,
}

impl TaskMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while some thread holds the write lock.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.rw.is_write_locked()
    }

    /// Returns the number of read locks currently held.
    #[must_use]
    pub fn readers(&self) -> usize {
        self.rw.readers()
    }

    /// Returns `true` while the writer has work published for helpers.
    #[must_use]
    pub fn has_published_work(&self) -> bool {
        self.execution.lock().is_some()
    }

    fn published(&self) -> Option<TaskGroup> {
        self.execution.lock().as_ref().map(|s| s.group.clone())
    }
}

/// Clears the published state when `execute` returns or unwinds.
struct Publication<'m> {
    mutex: &'m TaskMutex,
}

impl<'m> Publication<'m> {
    fn new(mutex: &'m TaskMutex, group: TaskGroup) -> Self {
        *mutex.execution.lock() = Some(ExecutionState { group });
        Self { mutex }
    }
}

impl Drop for Publication<'_> {
    fn drop(&mut self) {
        *self.mutex.execution.lock() = None;
    }
}

/// A lock held on a [`TaskMutex`], released when dropped.
///
/// A `ScopedLock` starts empty and can acquire different mutexes over its
/// lifetime, one at a time.
#[derive(Debug, Default)]
pub struct ScopedLock<'m> {
    mutex: Option<&'m TaskMutex>,
    lock_type: LockType,
}

impl<'m> ScopedLock<'m> {
    /// Creates a lock that holds nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mutex: None,
            lock_type: LockType::None,
        }
    }

    /// Creates a lock and blocks until `mutex` is acquired, helping with
    /// published work while waiting.
    #[must_use]
    pub fn locked(mutex: &'m TaskMutex, write: bool) -> Self {
        let mut lock = Self::new();
        lock.acquire(mutex, write, true);
        lock
    }

    /// Returns the mode currently held.
    #[must_use]
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// Blocks until `mutex` is acquired for reading or writing.
    ///
    /// While blocked, if `accept_work` is set and the current writer has
    /// published work, this thread runs some of that work before trying
    /// again. Contention never produces an error.
    pub fn acquire(&mut self, mutex: &'m TaskMutex, write: bool, accept_work: bool) {
        let lock_type = if write { LockType::Write } else { LockType::Read };
        let mut backoff = Backoff::new();
        while !self.acquire_or(mutex, lock_type, |_| accept_work) {
            if write {
                mutex.rw.mark_writer_pending();
            }
            backoff.snooze();
        }
    }

    /// Tries once to acquire `mutex` without blocking or helping.
    pub fn try_acquire(&mut self, mutex: &'m TaskMutex, write: bool) -> bool {
        let lock_type = if write { LockType::Write } else { LockType::Read };
        self.acquire_or(mutex, lock_type, |_| false)
    }

    /// Tries once to acquire `mutex` in `lock_type` mode.
    ///
    /// If the lock is contended and the writer has published work,
    /// `work_notifier` is called with the number of tasks waiting. If it
    /// returns `true`, this thread runs queued tasks of the published group.
    /// Either way the call then returns `false`, so the caller can re-check
    /// whatever made it want the lock before trying again.
    ///
    /// [`LockType::WorkerRead`] is granted immediately to a thread that is
    /// already working inside the published group; otherwise it is treated
    /// as [`LockType::Read`] and reported as such by
    /// [`lock_type`](Self::lock_type).
    ///
    /// # Panics
    ///
    /// Panics if this lock already holds a mutex, or if `lock_type` is
    /// [`LockType::None`].
    pub fn acquire_or(
        &mut self,
        mutex: &'m TaskMutex,
        lock_type: LockType,
        work_notifier: impl FnOnce(usize) -> bool,
    ) -> bool {
        assert!(self.mutex.is_none(), "ScopedLock already holds a mutex");
        let acquired = match lock_type {
            LockType::None => panic!("cannot acquire LockType::None"),
            LockType::Write => mutex.rw.try_lock_write().then_some(LockType::Write),
            LockType::Read => mutex.rw.try_lock_read().then_some(LockType::Read),
            LockType::WorkerRead => {
                let current = thread::current().id();
                if mutex
                    .published()
                    .is_some_and(|group| group.is_participant(current))
                {
                    Some(LockType::WorkerRead)
                } else {
                    mutex.rw.try_lock_read().then_some(LockType::Read)
                }
            }
        };
        if let Some(held) = acquired {
            self.mutex = Some(mutex);
            self.lock_type = held;
            return true;
        }

        let Some(group) = mutex.published() else {
            return false;
        };
        if work_notifier(group.outstanding()) {
            let ran = group.help();
            tracing::trace!(ran, "helped the lock holder with published work");
        }
        false
    }

    /// Converts a held read lock into a write lock.
    ///
    /// Returns `true` if the upgrade was atomic. Returns `false` if the read
    /// lock was released and a write lock acquired afterwards; another writer
    /// may have run in between, so anything observed under the read lock
    /// must be checked again.
    ///
    /// # Panics
    ///
    /// Panics unless a plain [`LockType::Read`] lock is held.
    pub fn upgrade_to_writer(&mut self) -> bool {
        let mutex = match (self.mutex, self.lock_type) {
            (Some(mutex), LockType::Read) => mutex,
            _ => panic!("upgrade_to_writer() requires a read lock"),
        };
        let atomic = mutex.rw.upgrade();
        self.lock_type = LockType::Write;
        atomic
    }

    /// Runs `f` with a task group that waiting threads may help with.
    ///
    /// The group is published for the duration of the call. Before
    /// returning, this waits for every task spawned into the group. A panic
    /// in `f` or in any task is resumed on this thread only.
    ///
    /// # Panics
    ///
    /// Panics unless a write lock is held.
    pub fn execute<F, R>(&mut self, f: F) -> Result<R, Cancelled>
    where
        F: FnOnce(&TaskGroup) -> R,
    {
        self.execute_in(TaskGroup::new(), f)
    }

    /// Like [`execute`](Self::execute), but the work is abandoned once
    /// `canceller` fires.
    ///
    /// Returns `Err(Cancelled)` if `f` never started, or if cancellation
    /// caused any spawned task to be skipped. `Ok` therefore always means `f`
    /// and all of its tasks ran to completion.
    pub fn execute_cancellable<F, R>(&mut self, canceller: &Canceller, f: F) -> Result<R, Cancelled>
    where
        F: FnOnce(&TaskGroup) -> R,
    {
        self.execute_in(TaskGroup::with_canceller(canceller.clone()), f)
    }

    fn execute_in<F, R>(&mut self, group: TaskGroup, f: F) -> Result<R, Cancelled>
    where
        F: FnOnce(&TaskGroup) -> R,
    {
        let mutex = match (self.mutex, self.lock_type) {
            (Some(mutex), LockType::Write) => mutex,
            _ => panic!("execute() requires a write lock"),
        };
        let publication = Publication::new(mutex, group.clone());

        let outcome = if group.is_cancelled() {
            None
        } else {
            let _owner = group.enter();
            Some(panic::catch_unwind(AssertUnwindSafe(|| f(&group))))
        };
        if matches!(outcome, Some(Err(_))) {
            group.cancel();
        }
        group.drain();
        let task_panic = group.take_panic();
        drop(publication);

        match outcome {
            None => {
                tracing::debug!("execute() cancelled before the functor ran");
                Err(Cancelled)
            }
            Some(Err(payload)) => panic::resume_unwind(payload),
            Some(Ok(value)) => {
                if let Some(payload) = task_panic {
                    panic::resume_unwind(payload);
                }
                if group.skipped() > 0 {
                    tracing::debug!(
                        skipped = group.skipped(),
                        "execute() cancelled with tasks outstanding"
                    );
                    return Err(Cancelled);
                }
                Ok(value)
            }
        }
    }

    /// Releases whatever is held. Releasing an empty lock does nothing.
    pub fn release(&mut self) {
        let Some(mutex) = self.mutex.take() else {
            return;
        };
        match core::mem::take(&mut self.lock_type) {
            LockType::Read => mutex.rw.unlock_read(),
            LockType::Write => mutex.rw.unlock_write(),
            LockType::WorkerRead | LockType::None => {}
        }
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
