//! Time source for the sample schedule.
//!
//! The sampler never calls `thread::sleep` directly; it asks a `Clock` to wait
//! until the next deadline. Production uses `MonotonicClock`; tests inject a
//! `VirtualClock` so drift correction and long runs need no wall-clock waits.

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Block until `now() >= deadline`. Returns immediately if already past.
    fn sleep_until(&self, deadline: Duration);
}

/// Wall-clock monotonic time anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}

/// Manually driven clock. Sleeping jumps straight to the deadline.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Mutex<Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward, e.g. to simulate a slow conversion inside a fake source.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to `t`; never moves backwards.
    pub fn set(&self, t: Duration) {
        let mut now = self.now.lock();
        if t > *now {
            *now = t;
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep_until(&self, deadline: Duration) {
        self.set(deadline);
    }
}
