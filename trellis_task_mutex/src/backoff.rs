// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded exponential backoff for spin loops.

use std::hint;
use std::thread;

/// Doublings of the spin count before switching to `yield_now`.
const SPIN_LIMIT: u32 = 6;
/// Step at which the backoff stops growing.
const YIELD_LIMIT: u32 = 10;

/// Bounded exponential backoff.
///
/// The first few calls to [`snooze`](Self::snooze) busy-spin for 1, 2, 4, ...
/// iterations. Past that, each call yields the thread to the OS scheduler.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    /// Creates a backoff at its shortest delay.
    #[must_use]
    pub fn new() -> Self {
        Self { step: 0 }
    }

    /// Waits for the current delay, then lengthens it.
    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1_u32 << self.step {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        if self.step <= YIELD_LIMIT {
            self.step += 1;
        }
    }

    /// Returns to the shortest delay.
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Returns `true` once spinning has given way to yielding.
    #[must_use]
    pub fn is_yielding(&self) -> bool {
        self.step > SPIN_LIMIT
    }
}
