// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Global virtual clock.
//!
//! One watermark for the whole scheduling domain. It tracks the vtime of the
//! task making the most progress and only ever moves forward. Updates are
//! lock-free: a relaxed compare-and-swap loop that gives up as soon as the
//! clock is already at or past the candidate value.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::types::Vtime;

#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Vtime {
        Vtime(self.now.load(Ordering::Relaxed))
    }

    /// Rewind to zero for a new activation.
    pub fn reset(&self) {
        self.now.store(0, Ordering::Relaxed);
    }

    /// Advance the clock to `vtime` if it is behind. Returns true if this
    /// call moved the clock.
    pub fn advance(&self, vtime: Vtime) -> bool {
        let mut cur = self.now.load(Ordering::Relaxed);
        while Vtime(cur).before(vtime) {
            match self
                .now
                .compare_exchange_weak(cur, vtime.0, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }
}
