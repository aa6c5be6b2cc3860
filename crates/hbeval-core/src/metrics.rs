//! Process-level telemetry counters.
//!
//! Counters are bumped silently at the call site; [`Metrics::flush`] emits
//! them as one `info!` event. They are telemetry only. Audit figures live
//! in [`crate::memory::StatsRegistry`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    attempts_executed: AtomicU64,
    attempt_timeouts: AtomicU64,
    replans_applied: AtomicU64,
    certifications: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            attempts_executed: AtomicU64::new(0),
            attempt_timeouts: AtomicU64::new(0),
            replans_applied: AtomicU64::new(0),
            certifications: AtomicU64::new(0),
        }
    }

    pub fn inc_attempts(&self) {
        self.attempts_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempts_executed", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.attempt_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempt_timeouts", "counter incremented");
    }

    pub fn inc_replans(&self) {
        self.replans_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "replans_applied", "counter incremented");
    }

    pub fn inc_certifications(&self) {
        self.certifications.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "certifications", "counter incremented");
    }

    /// Emit all counters as a single event. Call at run boundaries.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            attempts_executed = self.attempts_executed(),
            attempt_timeouts = self.attempt_timeouts(),
            replans_applied = self.replans_applied(),
            certifications = self.certifications(),
        );
    }

    pub fn attempts_executed(&self) -> u64 {
        self.attempts_executed.load(Ordering::Relaxed)
    }

    pub fn attempt_timeouts(&self) -> u64 {
        self.attempt_timeouts.load(Ordering::Relaxed)
    }

    pub fn replans_applied(&self) -> u64 {
        self.replans_applied.load(Ordering::Relaxed)
    }

    pub fn certifications(&self) -> u64 {
        self.certifications.load(Ordering::Relaxed)
    }
}
