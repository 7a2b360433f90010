// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Memoized compute results, one collaborative mutex per entry.

use std::cell::RefCell;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use trellis_context::{Canceller, ContentHash, Value};
use trellis_task_mutex::{Backoff, LockType, ScopedLock, TaskGroup, TaskMutex};

use crate::error::EvalError;
use crate::ids::PlugId;
use crate::node::CachePolicy;

/// Output plug and the hash of the value it holds.
pub(crate) type ComputeKey = (PlugId, ContentHash);

enum State {
    /// Not yet computed, or the last attempt failed.
    Pending,
    Ready { value: Value, cost: usize },
}

struct Item {
    mutex: TaskMutex,
    state: Mutex<State>,
}

impl Item {
    fn ready(&self) -> Option<Value> {
        match &*self.state.lock() {
            State::Ready { value, .. } => Some(value.clone()),
            State::Pending => None,
        }
    }
}

struct Inner {
    items: LruCache<ComputeKey, Arc<Item>>,
    usage: usize,
    limit: usize,
}

impl Inner {
    /// Drops least recently used entries until usage fits the limit.
    /// Entries some thread still holds are skipped.
    fn limit_cost(&mut self) {
        if self.usage <= self.limit {
            return;
        }
        let mut excess = self.usage - self.limit;
        let victims: Vec<ComputeKey> = self
            .items
            .iter()
            .rev()
            .filter(|(_, item)| Arc::strong_count(item) == 1)
            .map_while(|(key, item)| {
                if excess == 0 {
                    return None;
                }
                if let State::Ready { cost, .. } = &*item.state.lock() {
                    excess = excess.saturating_sub(*cost);
                }
                Some(*key)
            })
            .collect();
        for key in victims {
            if let Some(item) = self.items.pop(&key) {
                self.forget(&item);
            }
        }
        tracing::trace!(usage = self.usage, limit = self.limit, "compute cache trimmed");
    }

    fn forget(&mut self, item: &Item) {
        if let State::Ready { cost, .. } = &*item.state.lock() {
            self.usage -= cost;
        }
    }
}

thread_local! {
    /// Keys this thread is computing, innermost last.
    static HELD: RefCell<Vec<ComputeKey>> = const { RefCell::new(Vec::new()) };
}

struct Held;

impl Held {
    fn enter(key: ComputeKey) -> Option<Self> {
        HELD.with_borrow_mut(|held| {
            if held.contains(&key) {
                None
            } else {
                held.push(key);
                Some(Self)
            }
        })
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        HELD.with_borrow_mut(|held| {
            held.pop();
        });
    }
}

/// Values keyed by output and hash, bounded by their total
/// [`Value::memory_usage`].
///
/// At most one thread computes any key at a time. Others requesting it
/// wait, or with [`CachePolicy::Collaborative`] run the computing thread's
/// subtasks while they wait. Failed and cancelled computations are not
/// stored, so the next request computes again.
pub(crate) struct ComputeCache {
    inner: Mutex<Inner>,
}

impl ComputeCache {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: LruCache::unbounded(),
                usage: 0,
                limit,
            }),
        }
    }

    /// Finds or creates the item for `key`. `true` if it was created.
    fn item(&self, key: ComputeKey) -> (Arc<Item>, bool) {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.items.get(&key) {
            return (item.clone(), false);
        }
        let item = Arc::new(Item {
            mutex: TaskMutex::new(),
            state: Mutex::new(State::Pending),
        });
        inner.items.put(key, item.clone());
        (item, true)
    }

    /// Returns the cached value for `key`, running `compute` on a miss.
    ///
    /// `compute` receives the task group subtasks may be spawned into when
    /// the policy is collaborative.
    pub(crate) fn get(
        &self,
        key: ComputeKey,
        policy: CachePolicy,
        canceller: Option<&Canceller>,
        compute: impl FnOnce(Option<&TaskGroup>) -> Result<Value, EvalError>,
    ) -> Result<Value, EvalError> {
        if policy == CachePolicy::Uncached {
            return compute(None);
        }
        let Some(_held) = Held::enter(key) else {
            tracing::debug!(plug = ?key.0, "recursive request computed uncached");
            return compute(None);
        };
        let collaborative = policy == CachePolicy::Collaborative;

        let mut backoff = Backoff::new();
        loop {
            let (item, created) = self.item(key);
            if !created && let Some(value) = item.ready() {
                return Ok(value);
            }

            let mut lock = ScopedLock::new();
            let lock_type = if created {
                LockType::Write
            } else {
                LockType::WorkerRead
            };
            if !lock.acquire_or(&item.mutex, lock_type, |_| collaborative) {
                drop(lock);
                backoff.snooze();
                continue;
            }
            match lock.lock_type() {
                // Requested from inside the owner's own subtasks.
                LockType::WorkerRead => return compute(None),
                LockType::Read => {
                    if let Some(value) = item.ready() {
                        return Ok(value);
                    }
                    if !lock.upgrade_to_writer()
                        && let Some(value) = item.ready()
                    {
                        return Ok(value);
                    }
                }
                LockType::Write | LockType::None => {}
            }

            let result = if collaborative {
                let outcome = match canceller {
                    Some(canceller) => {
                        lock.execute_cancellable(canceller, |group| compute(Some(group)))
                    }
                    None => lock.execute(|group| compute(Some(group))),
                };
                outcome.unwrap_or_else(|cancelled| Err(cancelled.into()))
            } else {
                compute(None)
            };

            if let Ok(value) = &result {
                let cost = value.memory_usage();
                *item.state.lock() = State::Ready {
                    value: value.clone(),
                    cost,
                };
                let mut inner = self.inner.lock();
                // The entry may have been cleared while computing.
                if inner
                    .items
                    .peek(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &item))
                {
                    inner.usage += cost;
                }
            }
            drop(lock);
            let mut inner = self.inner.lock();
            // A failed entry holds nothing. Keep it only while other requests share it.
            if result.is_err()
                && Arc::strong_count(&item) == 2
                && inner
                    .items
                    .peek(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &item))
            {
                inner.items.pop(&key);
            }
            drop(item);
            inner.limit_cost();
            return result;
        }
    }

    /// Drops every entry not currently in use.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        let idle: Vec<ComputeKey> = inner
            .items
            .iter()
            .filter(|(_, item)| Arc::strong_count(item) == 1)
            .map(|(key, _)| *key)
            .collect();
        for key in idle {
            if let Some(item) = inner.items.pop(&key) {
                inner.forget(&item);
            }
        }
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.inner.lock().usage
    }

    pub(crate) fn set_memory_limit(&self, limit: usize) {
        let mut inner = self.inner.lock();
        inner.limit = limit;
        inner.limit_cost();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use trellis_context::ContentHasher;

    use super::*;
    use crate::error::ComputeError;
    use crate::ids::ComponentId;

    fn key(n: u32) -> ComputeKey {
        (
            PlugId(ComponentId::new(n, 1)),
            ContentHasher::new().append(&n).finish(),
        )
    }

    #[test]
    fn computes_once_and_serves_hits() {
        let cache = ComputeCache::new(usize::MAX);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get(key(1), CachePolicy::Standard, None, |_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(Value::from(5))
                })
                .unwrap();
            assert_eq!(value, Value::Int(5));
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(cache.memory_usage(), Value::Int(5).memory_usage());
    }

    #[test]
    fn uncached_always_computes() {
        let cache = ComputeCache::new(usize::MAX);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache
                .get(key(1), CachePolicy::Uncached, None, |_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(Value::from(1))
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn failures_are_not_stored() {
        let cache = ComputeCache::new(usize::MAX);
        let err = cache
            .get(key(1), CachePolicy::Standard, None, |_| {
                Err(ComputeError::failed("Oops!").into())
            })
            .unwrap_err();
        assert_eq!(err, EvalError::Compute(ComputeError::failed("Oops!")));
        let value = cache
            .get(key(1), CachePolicy::Standard, None, |_| Ok(Value::from(2)))
            .unwrap();
        assert_eq!(value, Value::Int(2));
        let value = cache
            .get(key(1), CachePolicy::Standard, None, |_| {
                Err(ComputeError::failed("not called").into())
            })
            .unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn failed_and_cancelled_computes_leave_no_entry() {
        let cache = ComputeCache::new(usize::MAX);
        for n in 0..100 {
            cache
                .get(key(n), CachePolicy::Standard, None, |_| {
                    Err(ComputeError::failed("Oops!").into())
                })
                .unwrap_err();
        }
        let canceller = Canceller::new();
        canceller.cancel();
        cache
            .get(key(100), CachePolicy::Collaborative, Some(&canceller), |_| {
                Ok(Value::from(1))
            })
            .unwrap_err();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn concurrent_requests_compute_once() {
        let cache = ComputeCache::new(usize::MAX);
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    let value = cache
                        .get(key(7), CachePolicy::Standard, None, |_| {
                            calls.fetch_add(1, Ordering::Relaxed);
                            std::thread::sleep(core::time::Duration::from_millis(20));
                            Ok(Value::from(7))
                        })
                        .unwrap();
                    assert_eq!(value, Value::Int(7));
                });
            }
        });
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn collaborative_runs_subtasks() {
        let cache = ComputeCache::new(usize::MAX);
        let total = Arc::new(AtomicUsize::new(0));
        let value = cache
            .get(key(1), CachePolicy::Collaborative, None, |group| {
                let group = group.expect("collaborative computes get a group");
                for i in 1..=10 {
                    let total = total.clone();
                    group.spawn(move || {
                        total.fetch_add(i, Ordering::Relaxed);
                    });
                }
                Ok(Value::from(1))
            })
            .unwrap();
        assert_eq!(value, Value::Int(1));
        assert_eq!(total.load(Ordering::Relaxed), 55);
    }

    #[test]
    fn cancelled_collaborative_compute_stays_pending() {
        let cache = ComputeCache::new(usize::MAX);
        let canceller = Canceller::new();
        canceller.cancel();
        let err = cache
            .get(key(1), CachePolicy::Collaborative, Some(&canceller), |_| {
                Ok(Value::from(1))
            })
            .unwrap_err();
        assert!(err.is_cancelled());
        let value = cache
            .get(key(1), CachePolicy::Collaborative, None, |_| Ok(Value::from(2)))
            .unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn recursive_request_for_the_same_key_computes_uncached() {
        let cache = ComputeCache::new(usize::MAX);
        let value = cache
            .get(key(1), CachePolicy::Standard, None, |_| {
                cache.get(key(1), CachePolicy::Standard, None, |_| Ok(Value::from(3)))
            })
            .unwrap();
        assert_eq!(value, Value::Int(3));
    }

    #[test]
    fn memory_limit_evicts_least_recently_used() {
        let one = Value::from(vec![0.0; 16]).memory_usage();
        let cache = ComputeCache::new(one * 2);
        for n in 0..3 {
            cache
                .get(key(n), CachePolicy::Standard, None, |_| {
                    Ok(Value::from(vec![0.0; 16]))
                })
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.memory_usage(), one * 2);

        let calls = AtomicUsize::new(0);
        cache
            .get(key(0), CachePolicy::Standard, None, |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(Value::from(vec![0.0; 16]))
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        cache.set_memory_limit(0);
        assert_eq!(cache.memory_usage(), 0);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
