// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Concurrency properties of `TaskMutex` under real contention.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use trellis_task_mutex::{Cancelled, Canceller, LockType, ScopedLock, TaskGroup, TaskMutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn thread_count() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get().clamp(2, 16))
}

#[test]
fn at_most_one_writer_under_heavy_contention() {
    init_tracing();
    const TOTAL: usize = 1_000_000;

    let threads = thread_count();
    let per_thread = TOTAL / threads;
    let mutex = Arc::new(TaskMutex::new());
    let writers = Arc::new(AtomicUsize::new(0));
    let readers = Arc::new(AtomicUsize::new(0));
    let acquisitions = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let mutex = mutex.clone();
            let writers = writers.clone();
            let readers = readers.clone();
            let acquisitions = acquisitions.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    let write = i % 8 != 0;
                    let lock = ScopedLock::locked(&mutex, write);
                    if write {
                        assert_eq!(writers.fetch_add(1, Ordering::AcqRel), 0, "two writers");
                        assert_eq!(readers.load(Ordering::Acquire), 0, "reader during write");
                        writers.fetch_sub(1, Ordering::AcqRel);
                    } else {
                        readers.fetch_add(1, Ordering::AcqRel);
                        assert_eq!(writers.load(Ordering::Acquire), 0, "writer during read");
                        readers.fetch_sub(1, Ordering::AcqRel);
                    }
                    drop(lock);
                    acquisitions.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(acquisitions.load(Ordering::Relaxed), per_thread * threads);
    assert!(!mutex.is_write_locked());
    assert_eq!(mutex.readers(), 0);
}

#[test]
fn interleaved_writer_makes_upgrade_report_false() {
    init_tracing();
    for _ in 0..200 {
        let mutex = Arc::new(TaskMutex::new());
        let barrier = Arc::new(Barrier::new(2));
        let writes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let mutex = mutex.clone();
                let barrier = barrier.clone();
                let writes = writes.clone();
                thread::spawn(move || {
                    let mut lock = ScopedLock::new();
                    lock.acquire(&mutex, false, false);
                    barrier.wait();
                    let atomic = lock.upgrade_to_writer();
                    assert_eq!(lock.lock_type(), LockType::Write);
                    let writes_before = writes.fetch_add(1, Ordering::AcqRel);
                    (atomic, writes_before)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let atomic: Vec<_> = results.iter().filter(|(atomic, _)| *atomic).collect();
        let slow: Vec<_> = results.iter().filter(|(atomic, _)| !*atomic).collect();
        assert_eq!(atomic.len(), 1, "exactly one upgrade can be atomic");
        assert_eq!(slow.len(), 1);
        assert_eq!(atomic[0].1, 0, "the atomic upgrader writes first");
        assert_eq!(slow[0].1, 1, "the other writer interleaved before the slow upgrade");
    }
}

#[test]
fn blocked_writer_runs_the_owners_subtasks() {
    init_tracing();
    let mutex = Arc::new(TaskMutex::new());
    let owner = thread::current().id();
    let ran_on = Arc::new(Mutex::new(Vec::new()));
    let helped = Arc::new(AtomicBool::new(false));

    let mut lock = ScopedLock::locked(&mutex, true);
    let waiter = {
        let mutex = mutex.clone();
        thread::spawn(move || {
            let mut lock = ScopedLock::new();
            lock.acquire(&mutex, true, true);
            lock.release();
            thread::current().id()
        })
    };

    let helped_in_time = lock
        .execute(|group| {
            // More tasks than pool workers, and each one blocks until the
            // waiter has taken one, so the waiter always finds some queued.
            for _ in 0..rayon::current_num_threads() + 2 {
                let ran_on = ran_on.clone();
                let helped = helped.clone();
                group.spawn(move || {
                    let me = thread::current().id();
                    ran_on.lock().push(me);
                    if me != owner && rayon::current_thread_index().is_none() {
                        helped.store(true, Ordering::Release);
                    }
                    while !helped.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                    }
                });
            }
            let deadline = Instant::now() + Duration::from_secs(10);
            while !helped.load(Ordering::Acquire) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            helped.swap(true, Ordering::AcqRel)
        })
        .unwrap();
    lock.release();

    let waiter = waiter.join().unwrap();
    assert!(helped_in_time, "no waiting thread ran a subtask");
    assert!(ran_on.lock().contains(&waiter));
}

#[test]
fn functor_panic_reaches_only_the_owner() {
    init_tracing();
    let mutex = Arc::new(TaskMutex::new());
    let in_execute = Arc::new(Barrier::new(2));

    let helper = {
        let mutex = mutex.clone();
        let in_execute = in_execute.clone();
        thread::spawn(move || {
            in_execute.wait();
            // Waits out the failing execute, then takes the lock normally.
            let lock = ScopedLock::locked(&mutex, true);
            lock.lock_type()
        })
    };

    let mut lock = ScopedLock::locked(&mutex, true);
    let payload = panic::catch_unwind(AssertUnwindSafe(|| {
        lock.execute(|group| {
            for _ in 0..16 {
                group.spawn(|| thread::sleep(Duration::from_micros(100)));
            }
            in_execute.wait();
            panic!("Oops!");
        })
    }))
    .unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"Oops!"));
    assert!(!mutex.has_published_work());

    // The lock is still ours; a retry succeeds.
    assert_eq!(lock.execute(|_| 42), Ok(42));
    lock.release();

    assert_eq!(helper.join().unwrap(), LockType::Write);
}

#[test]
fn task_panic_is_resumed_on_owner_not_helpers() {
    init_tracing();
    let mutex = Arc::new(TaskMutex::new());
    let published = Arc::new(Barrier::new(2));
    let helper_ran = Arc::new(AtomicUsize::new(0));

    let helper = {
        let mutex = mutex.clone();
        let published = published.clone();
        let helper_ran = helper_ran.clone();
        thread::spawn(move || {
            published.wait();
            let mut lock = ScopedLock::new();
            while !lock.acquire_or(&mutex, LockType::Write, |_| {
                helper_ran.fetch_add(1, Ordering::Relaxed);
                true
            }) {
                thread::yield_now();
            }
        })
    };

    let mut lock = ScopedLock::locked(&mutex, true);
    let payload = panic::catch_unwind(AssertUnwindSafe(|| {
        lock.execute(|group| {
            for i in 0..64 {
                group.spawn(move || {
                    thread::sleep(Duration::from_micros(50));
                    if i == 63 {
                        panic!("Oops!");
                    }
                });
            }
            published.wait();
        })
    }))
    .unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"Oops!"));
    drop(lock);

    helper.join().expect("helper thread never sees the panic");
}

#[test]
fn sibling_cancellation_is_never_mistaken_for_completion() {
    init_tracing();
    const EXECUTES: usize = 1000;
    const SIBLINGS: usize = 100;

    let mutexes: Arc<Vec<TaskMutex>> = Arc::new((0..10).map(|_| TaskMutex::new()).collect());
    let completed = AtomicUsize::new(0);
    let cancelled = AtomicUsize::new(0);
    let silent = AtomicUsize::new(0);

    rayon::scope(|s| {
        for i in 0..EXECUTES + SIBLINGS {
            if i % 11 == 10 {
                s.spawn(|_| {
                    let sibling = TaskGroup::new();
                    for _ in 0..8 {
                        sibling.spawn(|| thread::sleep(Duration::from_micros(20)));
                    }
                    sibling.cancel();
                    assert_eq!(sibling.wait(), Err(Cancelled));
                });
                continue;
            }
            let mutexes = mutexes.clone();
            let (completed, cancelled, silent) = (&completed, &cancelled, &silent);
            s.spawn(move |_| {
                let ran = Arc::new(AtomicBool::new(false));
                let subtasks = Arc::new(AtomicUsize::new(0));
                let mut lock = ScopedLock::locked(&mutexes[i % 10], true);
                let canceller = Canceller::new();
                let r = ran.clone();
                let st = subtasks.clone();
                let result = lock.execute_cancellable(&canceller, move |group| {
                    for _ in 0..4 {
                        let st = st.clone();
                        group.spawn(move || {
                            st.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                    r.store(true, Ordering::Release);
                });
                match result {
                    Ok(()) => {
                        if ran.load(Ordering::Acquire) && subtasks.load(Ordering::Relaxed) == 4 {
                            completed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            silent.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(Cancelled) => {
                        cancelled.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(silent.load(Ordering::Relaxed), 0);
    assert_eq!(
        completed.load(Ordering::Relaxed) + cancelled.load(Ordering::Relaxed),
        EXECUTES
    );
}
