//! Timing for the background topology check
//!
//! The refresh loop never sleeps directly; it asks a `Ticker` when the next
//! check is due, which lets tests drive the loop one tick at a time.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Owned stop flag for a background loop
#[derive(Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep up to `timeout`; returns true if stopped
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Paces the refresh loop
pub trait Ticker: Send + Sync {
    /// Block until the next check is due. Returns false once `stop` fired.
    fn wait(&self, stop: &StopSignal) -> bool;
}

/// Fires every `interval` of wall-clock time
#[derive(Debug, Clone)]
pub struct IntervalTicker {
    pub interval: Duration,
}

impl IntervalTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for IntervalTicker {
    fn wait(&self, stop: &StopSignal) -> bool {
        !stop.wait_timeout(self.interval)
    }
}
