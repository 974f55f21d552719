//! Global atomic counters for evaluation outcomes.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the server shuts down).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    evaluations: AtomicU64,
    succeeded: AtomicU64,
    denied: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    overloaded: AtomicU64,
    abandoned_workers: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            overloaded: AtomicU64::new(0),
            abandoned_workers: AtomicU64::new(0),
        }
    }

    /// A request entered the sandbox.
    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "succeeded", "counter incremented");
    }

    pub fn inc_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "denied", "counter incremented");
    }

    /// Compile, runtime or request failures.
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failed", "counter incremented");
    }

    pub fn inc_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timed_out", "counter incremented");
    }

    pub fn inc_overloaded(&self) {
        self.overloaded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "overloaded", "counter incremented");
    }

    /// A worker thread was left running past its deadline.
    pub fn inc_abandoned_workers(&self) {
        self.abandoned_workers.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "abandoned_workers", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            succeeded = self.succeeded(),
            denied = self.denied(),
            failed = self.failed(),
            timed_out = self.timed_out(),
            overloaded = self.overloaded(),
            abandoned_workers = self.abandoned_workers(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub fn overloaded(&self) -> u64 {
        self.overloaded.load(Ordering::Relaxed)
    }

    pub fn abandoned_workers(&self) -> u64 {
        self.abandoned_workers.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.evaluations,
            &self.succeeded,
            &self.denied,
            &self.failed,
            &self.timed_out,
            &self.overloaded,
            &self.abandoned_workers,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
