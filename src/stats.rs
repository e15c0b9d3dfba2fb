//! Transport counters
//!
//! Written with relaxed atomics from the render context, read as a snapshot
//! from the control side. These sit next to the `tracing` diagnostics so an
//! overrun can be observed without scraping logs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportStats {
    quanta: AtomicU64,
    gated_quanta: AtomicU64,
    overruns: AtomicU64,
    samples_dropped: AtomicU64,
    reports_dropped: AtomicU64,
    unarmed_blocks: AtomicU64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_quantum(&self) {
        self.quanta.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gated(&self) {
        self.gated_quanta.fetch_add(1, Ordering::Relaxed);
    }

    /// A recording enqueue accepted fewer samples than offered
    pub(crate) fn record_overrun(&self, dropped: usize) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
        self.samples_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_report_dropped(&self) {
        self.reports_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unarmed(&self) {
        self.unarmed_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            quanta: self.quanta.load(Ordering::Relaxed),
            gated_quanta: self.gated_quanta.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            unarmed_blocks: self.unarmed_blocks.load(Ordering::Relaxed),
        }
    }

    /// Reset statistics
    pub fn reset(&self) {
        self.quanta.store(0, Ordering::Relaxed);
        self.gated_quanta.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
        self.reports_dropped.store(0, Ordering::Relaxed);
        self.unarmed_blocks.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub quanta: u64,
    pub gated_quanta: u64,
    pub overruns: u64,
    pub samples_dropped: u64,
    pub reports_dropped: u64,
    pub unarmed_blocks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrun_accumulates() {
        let stats = TransportStats::new();
        stats.record_overrun(12);
        stats.record_overrun(4);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.overruns, 2);
        assert_eq!(snapshot.samples_dropped, 16);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
