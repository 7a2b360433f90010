// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Task groups: the unit of work a helper thread may join.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::backoff::Backoff;
use crate::cancel::{Cancelled, Canceller};

type Job = Box<dyn FnOnce() + Send + 'static>;
type Payload = Box<dyn Any + Send + 'static>;

/// A set of spawned tasks that completes as a whole.
///
/// Tasks are queued on the group and announced to the rayon global pool.
/// Whichever thread gets to a task first runs it: a pool worker, the thread
/// waiting on the group, or a thread that joined through
/// [`help`](Self::help). A helper only ever runs tasks of the group it
/// joined, never unrelated pool work.
///
/// A panic inside a task is captured and cancels the rest of the group. It is
/// resumed on the thread that calls [`wait`](Self::wait), never on a helper.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use trellis_task_mutex::TaskGroup;
///
/// let group = TaskGroup::new();
/// let sum = Arc::new(AtomicUsize::new(0));
/// for i in 1..=10 {
///     let sum = sum.clone();
///     group.spawn(move || {
///         sum.fetch_add(i, Ordering::Relaxed);
///     });
/// }
/// group.wait().unwrap();
/// assert_eq!(sum.load(Ordering::Relaxed), 55);
/// ```
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    queue: Mutex<VecDeque<Job>>,
    /// Spawned tasks not yet finished or skipped.
    outstanding: AtomicUsize,
    cancelled: AtomicBool,
    skipped: AtomicUsize,
    panic: Mutex<Option<Payload>>,
    canceller: Option<Canceller>,
    /// Threads currently running code on behalf of this group. A thread may
    /// appear more than once when tasks nest.
    active: Mutex<SmallVec<[ThreadId; 8]>>,
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("outstanding", &self.outstanding())
            .field("cancelled", &self.is_cancelled())
            .field("skipped", &self.skipped())
            .finish_non_exhaustive()
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty group that also counts as cancelled once `canceller`
    /// fires.
    #[must_use]
    pub fn with_canceller(canceller: Canceller) -> Self {
        Self::build(Some(canceller))
    }

    fn build(canceller: Option<Canceller>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                queue: Mutex::new(VecDeque::new()),
                outstanding: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                skipped: AtomicUsize::new(0),
                panic: Mutex::new(None),
                canceller,
                active: Mutex::new(SmallVec::new()),
            }),
        }
    }

    /// Queues `task` on the group.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        self.inner.queue.lock().push_back(Box::new(task));
        let inner = Arc::clone(&self.inner);
        rayon::spawn(move || {
            inner.run_one();
        });
    }

    /// Requests cancellation. Queued tasks that have not started are skipped.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if the group was cancelled, either directly, through its
    /// canceller, or by a panicking task.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Returns the number of tasks spawned but not yet finished.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Returns the number of tasks dropped without running because the group
    /// was cancelled.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.inner.skipped.load(Ordering::Acquire)
    }

    /// Runs queued tasks on the calling thread until none are left, then
    /// waits for tasks still running elsewhere.
    ///
    /// Returns `Err(Cancelled)` if the group was cancelled. If a task
    /// panicked, the panic is resumed here instead.
    pub fn wait(&self) -> Result<(), Cancelled> {
        self.inner.drain();
        if let Some(payload) = self.inner.take_panic() {
            panic::resume_unwind(payload);
        }
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs queued tasks on the calling thread until the queue is empty.
    ///
    /// Unlike [`wait`](Self::wait), this returns without waiting for tasks
    /// that other threads are running, and never resumes panics. Returns the
    /// number of tasks taken from the queue.
    pub fn help(&self) -> usize {
        let mut ran = 0;
        while self.inner.run_one() {
            ran += 1;
        }
        ran
    }

    /// Returns `true` if `thread` is currently running code for this group.
    #[must_use]
    pub fn is_participant(&self, thread: ThreadId) -> bool {
        self.inner.active.lock().contains(&thread)
    }

    pub(crate) fn enter(&self) -> Participation<'_> {
        self.inner.enter()
    }

    pub(crate) fn drain(&self) {
        self.inner.drain();
    }

    pub(crate) fn take_panic(&self) -> Option<Payload> {
        self.inner.take_panic()
    }
}

/// Registers the current thread as active in a group until dropped.
pub(crate) struct Participation<'a> {
    inner: &'a GroupInner,
    thread: ThreadId,
}

impl Drop for Participation<'_> {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock();
        if let Some(pos) = active.iter().position(|&t| t == self.thread) {
            active.swap_remove(pos);
        }
    }
}

impl GroupInner {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.canceller.as_ref().is_some_and(Canceller::cancelled)
    }

    fn enter(&self) -> Participation<'_> {
        let thread = thread::current().id();
        self.active.lock().push(thread);
        Participation {
            inner: self,
            thread,
        }
    }

    fn run_one(&self) -> bool {
        let Some(job) = self.queue.lock().pop_front() else {
            return false;
        };
        if self.is_cancelled() {
            drop(job);
            self.skipped.fetch_add(1, Ordering::AcqRel);
        } else {
            let _participation = self.enter();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                let mut slot = self.panic.lock();
                if slot.is_none() {
                    *slot = Some(payload);
                }
                self.cancelled.store(true, Ordering::Release);
            }
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        true
    }

    fn drain(&self) {
        let mut backoff = Backoff::new();
        loop {
            if self.run_one() {
                backoff.reset();
                continue;
            }
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            backoff.snooze();
        }
    }

    fn take_panic(&self) -> Option<Payload> {
        self.panic.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn nested_spawns_complete_before_wait_returns() {
        let group = TaskGroup::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let inner_group = group.clone();
            let hits = hits.clone();
            group.spawn(move || {
                for _ in 0..8 {
                    let hits = hits.clone();
                    inner_group.spawn(move || {
                        hits.fetch_add(1, Ordering::Relaxed);
                    });
                }
            });
        }
        group.wait().unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 64);
        assert_eq!(group.outstanding(), 0);
    }

    #[test]
    fn cancelled_group_skips_queued_tasks() {
        let group = TaskGroup::new();
        group.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        group.spawn(move || r.store(true, Ordering::Relaxed));

        assert_eq!(group.wait(), Err(Cancelled));
        assert!(!ran.load(Ordering::Relaxed));
        assert_eq!(group.skipped(), 1);
    }

    #[test]
    fn external_canceller_counts_as_cancellation() {
        let canceller = Canceller::new();
        let group = TaskGroup::with_canceller(canceller.clone());
        assert!(!group.is_cancelled());
        canceller.cancel();
        assert!(group.is_cancelled());
        assert_eq!(group.wait(), Err(Cancelled));
    }

    #[test]
    fn task_panic_is_resumed_by_wait() {
        let group = TaskGroup::new();
        group.spawn(|| panic!("Oops!"));
        let payload = panic::catch_unwind(AssertUnwindSafe(|| group.wait())).unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"Oops!"));
    }

    #[test]
    fn help_runs_only_this_groups_tasks() {
        let mine = TaskGroup::new();
        let other = TaskGroup::new();
        let gate = Arc::new(AtomicBool::new(false));

        // Keep the other group's task queued-or-blocked so it cannot be
        // mistaken for ours.
        let g = gate.clone();
        other.spawn(move || {
            while !g.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        mine.spawn(|| {});

        let ran = mine.help();
        assert!(ran <= 1);
        mine.wait().unwrap();
        gate.store(true, Ordering::Release);
        other.wait().unwrap();
    }
}
