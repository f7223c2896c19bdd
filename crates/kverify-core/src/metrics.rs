//! Global atomic counters for verification runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a scenario matrix).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    polls: AtomicU64,
    await_timeouts: AtomicU64,
    lock_acquisitions: AtomicU64,
    phases_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            await_timeouts: AtomicU64::new(0),
            lock_acquisitions: AtomicU64::new(0),
            phases_failed: AtomicU64::new(0),
        }
    }

    /// One fetch attempt by the await engine.
    pub fn inc_polls(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "polls", "counter incremented");
    }

    pub fn inc_await_timeouts(&self) {
        self.await_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "await_timeouts", "counter incremented");
    }

    pub fn inc_lock_acquisitions(&self) {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lock_acquisitions", "counter incremented");
    }

    pub fn inc_phases_failed(&self) {
        self.phases_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "phases_failed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            polls = self.polls(),
            await_timeouts = self.await_timeouts(),
            lock_acquisitions = self.lock_acquisitions(),
            phases_failed = self.phases_failed(),
        );
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn await_timeouts(&self) -> u64 {
        self.await_timeouts.load(Ordering::Relaxed)
    }

    pub fn lock_acquisitions(&self) -> u64 {
        self.lock_acquisitions.load(Ordering::Relaxed)
    }

    pub fn phases_failed(&self) -> u64 {
        self.phases_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.polls.store(0, Ordering::Relaxed);
        self.await_timeouts.store(0, Ordering::Relaxed);
        self.lock_acquisitions.store(0, Ordering::Relaxed);
        self.phases_failed.store(0, Ordering::Relaxed);
    }
}
