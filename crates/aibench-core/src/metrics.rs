//! Process-wide run counters.
//!
//! The orchestrator and the lock module bump these as a run progresses;
//! [`Metrics::flush`] reports them once per finished run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_started: AtomicU64,
    evaluators_executed: AtomicU64,
    evaluators_skipped: AtomicU64,
    stale_locks_reclaimed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            evaluators_executed: AtomicU64::new(0),
            evaluators_skipped: AtomicU64::new(0),
            stale_locks_reclaimed: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    /// An evaluator passed its preconditions and `evaluate` was called.
    pub fn inc_evaluators_executed(&self) {
        self.evaluators_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluators_executed", "counter incremented");
    }

    /// A result came back skipped, whatever the cause.
    pub fn inc_evaluators_skipped(&self) {
        self.evaluators_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluators_skipped", "counter incremented");
    }

    pub fn inc_stale_locks_reclaimed(&self) {
        self.stale_locks_reclaimed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stale_locks_reclaimed", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "run_counters",
            runs_started = self.runs_started(),
            evaluators_executed = self.evaluators_executed(),
            evaluators_skipped = self.evaluators_skipped(),
            stale_locks_reclaimed = self.stale_locks_reclaimed(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn evaluators_executed(&self) -> u64 {
        self.evaluators_executed.load(Ordering::Relaxed)
    }

    pub fn evaluators_skipped(&self) -> u64 {
        self.evaluators_skipped.load(Ordering::Relaxed)
    }

    pub fn stale_locks_reclaimed(&self) -> u64 {
        self.stale_locks_reclaimed.load(Ordering::Relaxed)
    }

    /// Zero every counter. Only meaningful while no run is in flight.
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.evaluators_executed.store(0, Ordering::Relaxed);
        self.evaluators_skipped.store(0, Ordering::Relaxed);
        self.stale_locks_reclaimed.store(0, Ordering::Relaxed);
    }
}
