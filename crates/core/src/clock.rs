// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.
//!
//! Fork placeholders, backup ids, and retention cutoffs are all derived from
//! wall-clock milliseconds; tests drive a `FakeClock` instead.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time.
pub trait Clock: Clone + Send + Sync + 'static {
    fn epoch_ms(&self) -> i64;
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Fake clock for testing with controllable time.
#[derive(Clone)]
pub struct FakeClock {
    epoch_ms: Arc<Mutex<i64>>,
}

impl FakeClock {
    pub fn at(epoch_ms: i64) -> Self {
        Self { epoch_ms: Arc::new(Mutex::new(epoch_ms)) }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.epoch_ms.lock() += duration.as_millis() as i64;
    }

    pub fn set_epoch_ms(&self, ms: i64) {
        *self.epoch_ms.lock() = ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::at(1_000_000)
    }
}

impl Clock for FakeClock {
    fn epoch_ms(&self) -> i64 {
        *self.epoch_ms.lock()
    }
}
