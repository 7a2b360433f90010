// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Upgradable reader/writer spin state.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backoff::Backoff;

const WRITER: usize = 1;
const WRITER_PENDING: usize = 2;
const READERS: usize = !(WRITER | WRITER_PENDING);
const ONE_READER: usize = 4;
const BUSY: usize = WRITER | READERS;

/// A single word holding the writer bit, a writer-pending hint, and the reader
/// count.
///
/// A pending writer stops new readers from entering, so a stream of readers
/// cannot starve a writer forever. Upgrades keep the caller's reader slot
/// until every other reader has left.
#[derive(Debug, Default)]
pub(crate) struct RawRwSpin {
    state: AtomicUsize,
}

impl RawRwSpin {
    pub(crate) fn try_lock_write(&self) -> bool {
        let s = self.state.load(Ordering::Relaxed);
        s & BUSY == 0
            && self
                .state
                .compare_exchange(s, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    pub(crate) fn lock_write(&self) {
        let mut backoff = Backoff::new();
        while !self.try_lock_write() {
            self.mark_writer_pending();
            backoff.snooze();
        }
    }

    pub(crate) fn mark_writer_pending(&self) {
        self.state.fetch_or(WRITER_PENDING, Ordering::Relaxed);
    }

    pub(crate) fn unlock_write(&self) {
        self.state.fetch_and(READERS, Ordering::Release);
    }

    pub(crate) fn try_lock_read(&self) -> bool {
        let s = self.state.load(Ordering::Relaxed);
        if s & (WRITER | WRITER_PENDING) != 0 {
            return false;
        }
        let previous = self.state.fetch_add(ONE_READER, Ordering::Acquire);
        if previous & WRITER == 0 {
            return true;
        }
        // A writer slipped in between the load and the increment.
        self.state.fetch_sub(ONE_READER, Ordering::Release);
        false
    }

    pub(crate) fn unlock_read(&self) {
        self.state.fetch_sub(ONE_READER, Ordering::Release);
    }

    /// Converts the caller's read lock into a write lock.
    ///
    /// Returns `true` if no other writer held the lock in between. Returns
    /// `false` if the read lock had to be released before the write lock was
    /// obtained.
    pub(crate) fn upgrade(&self) -> bool {
        let mut s = self.state.load(Ordering::Relaxed);
        while s & READERS == ONE_READER || s & WRITER_PENDING == 0 {
            match self.state.compare_exchange_weak(
                s,
                s | WRITER | WRITER_PENDING,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let mut backoff = Backoff::new();
                    while self.state.load(Ordering::Acquire) & READERS != ONE_READER {
                        backoff.snooze();
                    }
                    self.state
                        .fetch_sub(ONE_READER + WRITER_PENDING, Ordering::AcqRel);
                    return true;
                }
                Err(actual) => s = actual,
            }
        }
        self.unlock_read();
        self.lock_write();
        false
    }

    pub(crate) fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITER != 0
    }

    pub(crate) fn readers(&self) -> usize {
        (self.state.load(Ordering::Acquire) & READERS) / ONE_READER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_excludes_readers_and_writers() {
        let rw = RawRwSpin::default();
        assert!(rw.try_lock_write());
        assert!(!rw.try_lock_write());
        assert!(!rw.try_lock_read());
        rw.unlock_write();
        assert!(rw.try_lock_read());
        assert!(rw.try_lock_read());
        assert_eq!(rw.readers(), 2);
        assert!(!rw.try_lock_write());
        rw.unlock_read();
        rw.unlock_read();
        assert!(rw.try_lock_write());
    }

    #[test]
    fn pending_writer_blocks_new_readers() {
        let rw = RawRwSpin::default();
        assert!(rw.try_lock_read());
        rw.mark_writer_pending();
        assert!(!rw.try_lock_read());
        rw.unlock_read();
        assert!(rw.try_lock_write());
        rw.unlock_write();
        assert!(rw.try_lock_read());
    }

    #[test]
    fn sole_reader_upgrades_atomically() {
        let rw = RawRwSpin::default();
        assert!(rw.try_lock_read());
        assert!(rw.upgrade());
        assert!(rw.is_write_locked());
        assert_eq!(rw.readers(), 0);
        rw.unlock_write();
        assert!(!rw.is_write_locked());
    }
}
