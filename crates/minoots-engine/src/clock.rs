//! Injected clock, so sweeps and lifecycle transitions never call
//! `Utc::now()` directly.
//!
//! Every time-dependent component takes `Arc<dyn Clock>`. Production wiring
//! uses [`SystemClock`]; tests use [`TestClock`] to control drift and
//! deadline arithmetic deterministically.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// A source of the current time, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Production clock backed by the wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A settable clock for deterministic tests. Starts at an arbitrary fixed
/// instant rather than 0 so that `durationMs = 0` timers and millisecond
/// arithmetic can't accidentally underflow into negative timestamps.
#[derive(Debug)]
pub struct TestClock {
    now_ms: AtomicI64,
}

impl TestClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
