//! Global atomic counters for expedition observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations or locking.
pub struct Metrics {
    cycles_dispatched: AtomicU64,
    cycles_succeeded: AtomicU64,
    cycles_failed: AtomicU64,
    cycles_interrupted: AtomicU64,
    model_fallbacks: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            cycles_dispatched: AtomicU64::new(0),
            cycles_succeeded: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            cycles_interrupted: AtomicU64::new(0),
            model_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn inc_dispatched(&self) {
        self.cycles_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_dispatched", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.cycles_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_succeeded", "counter incremented");
    }

    pub fn inc_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_failed", "counter incremented");
    }

    pub fn inc_interrupted(&self) {
        self.cycles_interrupted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_interrupted", "counter incremented");
    }

    pub fn inc_model_fallbacks(&self) {
        self.model_fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "model_fallbacks", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            cycles_dispatched = self.cycles_dispatched(),
            cycles_succeeded = self.cycles_succeeded(),
            cycles_failed = self.cycles_failed(),
            cycles_interrupted = self.cycles_interrupted(),
            model_fallbacks = self.model_fallbacks(),
        );
    }

    pub fn cycles_dispatched(&self) -> u64 {
        self.cycles_dispatched.load(Ordering::Relaxed)
    }

    pub fn cycles_succeeded(&self) -> u64 {
        self.cycles_succeeded.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn cycles_interrupted(&self) -> u64 {
        self.cycles_interrupted.load(Ordering::Relaxed)
    }

    pub fn model_fallbacks(&self) -> u64 {
        self.model_fallbacks.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.cycles_dispatched.store(0, Ordering::Relaxed);
        self.cycles_succeeded.store(0, Ordering::Relaxed);
        self.cycles_failed.store(0, Ordering::Relaxed);
        self.cycles_interrupted.store(0, Ordering::Relaxed);
        self.model_fallbacks.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.cycles_dispatched(), 0);
        m.inc_dispatched();
        m.inc_dispatched();
        assert_eq!(m.cycles_dispatched(), 2);

        m.inc_succeeded();
        m.inc_failed();
        m.inc_interrupted();
        assert_eq!(m.cycles_succeeded(), 1);
        assert_eq!(m.cycles_failed(), 1);
        assert_eq!(m.cycles_interrupted(), 1);

        m.inc_model_fallbacks();
        assert_eq!(m.model_fallbacks(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_dispatched();
        m.inc_succeeded();
        m.inc_model_fallbacks();
        m.reset();
        assert_eq!(m.cycles_dispatched(), 0);
        assert_eq!(m.cycles_succeeded(), 0);
        assert_eq!(m.model_fallbacks(), 0);
    }
}
