//! Injectable wall-clock seconds source.
//!
//! Ring arithmetic uses wall seconds; a monotonic clock is not required.
//! Small backward skews are absorbed by the window treating a non-advancing
//! target as a no-op.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall time in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current wall time in seconds.
    fn now_sec(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_sec(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock starting at `now_sec`.
    pub fn new(now_sec: i64) -> Self {
        Self {
            now: AtomicI64::new(now_sec),
        }
    }

    /// Set the current time.
    pub fn set(&self, now_sec: i64) {
        self.now.store(now_sec, Ordering::SeqCst);
    }

    /// Advance the current time by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_sec(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
