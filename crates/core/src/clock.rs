// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for deterministic time in tests.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time.
///
/// All deadline arithmetic (heartbeats, ack timeouts, step timeouts,
/// debug-session expiry) goes through this trait so tests can drive
/// time manually with [`FakeClock`].
pub trait Clock: Clone + Send + Sync + 'static {
    /// Monotonic instant for deadline comparisons.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch, for persisted timestamps.
    fn epoch_ms(&self) -> u64;
}

/// Production clock backed by the OS.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockInner>>,
}

struct FakeClockInner {
    now: Instant,
    epoch_ms: u64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClockInner {
                now: Instant::now(),
                epoch_ms: 1_000_000,
            })),
        }
    }

    /// Advance both the monotonic and wall clock.
    pub fn advance(&self, d: Duration) {
        let mut inner = self.inner.lock();
        inner.now += d;
        inner.epoch_ms += d.as_millis() as u64;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn epoch_ms(&self) -> u64 {
        self.inner.lock().epoch_ms
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
