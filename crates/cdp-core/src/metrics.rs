//! Plain-atomics observability, matching the teacher's bare
//! `AtomicU64 reception_order_counter` + getter idiom (`rostra-client-db`)
//! rather than reaching for an external metrics-registry crate.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    buffered_events: AtomicI64,
    processed_events: AtomicU64,
    dedup_hits: AtomicU64,
    late_accepted: AtomicU64,
    dropped_too_late: AtomicU64,
    watermark_lag_ms: AtomicI64,
}

/// A point-in-time copy of every gauge/counter, for logging or exposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub buffered_events: i64,
    pub processed_events: u64,
    pub dedup_hits: u64,
    pub late_accepted: u64,
    pub dropped_too_late: u64,
    pub watermark_lag_ms: i64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_buffered(&self, delta: i64) {
        self.buffered_events.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn incr_processed(&self, count: u64) {
        self.processed_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn incr_dedup_hits(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_late_accepted(&self) {
        self.late_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dropped_too_late(&self) {
        self.dropped_too_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_watermark_lag_ms(&self, lag_ms: i64) {
        self.watermark_lag_ms.store(lag_ms, Ordering::Relaxed);
    }

    pub fn buffered_events(&self) -> i64 {
        self.buffered_events.load(Ordering::Relaxed)
    }

    pub fn processed_events(&self) -> u64 {
        self.processed_events.load(Ordering::Relaxed)
    }

    pub fn dedup_hits(&self) -> u64 {
        self.dedup_hits.load(Ordering::Relaxed)
    }

    pub fn late_accepted(&self) -> u64 {
        self.late_accepted.load(Ordering::Relaxed)
    }

    pub fn dropped_too_late(&self) -> u64 {
        self.dropped_too_late.load(Ordering::Relaxed)
    }

    pub fn watermark_lag_ms(&self) -> i64 {
        self.watermark_lag_ms.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            buffered_events: self.buffered_events(),
            processed_events: self.processed_events(),
            dedup_hits: self.dedup_hits(),
            late_accepted: self.late_accepted(),
            dropped_too_late: self.dropped_too_late(),
            watermark_lag_ms: self.watermark_lag_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.incr_processed(3);
        metrics.incr_processed(2);
        assert_eq!(metrics.processed_events(), 5);
    }

    #[test]
    fn buffered_gauge_can_decrease() {
        let metrics = Metrics::new();
        metrics.incr_buffered(5);
        metrics.incr_buffered(-2);
        assert_eq!(metrics.buffered_events(), 3);
    }

    #[test]
    fn snapshot_reflects_current_values() {
        let metrics = Metrics::new();
        metrics.incr_dedup_hits();
        metrics.incr_late_accepted();
        metrics.incr_dropped_too_late();
        metrics.set_watermark_lag_ms(42);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dedup_hits, 1);
        assert_eq!(snapshot.late_accepted, 1);
        assert_eq!(snapshot.dropped_too_late, 1);
        assert_eq!(snapshot.watermark_lag_ms, 42);
    }
}
