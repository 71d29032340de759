//! Per-profile reordering, dual watermarks, and deduplication — the piece
//! that turns an out-of-order, duplicate-laden stream into an in-order,
//! deduplicated one per profile.
//!
//! Grounded on `rostra-client/src/task/followee_checker.rs`'s
//! `tokio::select!` over `interval.tick()` vs. a change signal; generalized
//! here from a `watch<HashMap<..>>` content signal to a `watch<bool>` stop
//! signal, since the ticker here reacts to wall-clock time, not to upstream
//! state changes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cdp_dedup_cache::DedupCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, instrument, trace, warn};

use crate::clock::{Clock, Timestamp};
use crate::event::CdpEvent;
use crate::identity::ProfileId;
use crate::metrics::Metrics;

const LOG_TARGET: &str = "cdp::processor";

#[derive(Debug)]
struct HeapEntry {
    ts: Timestamp,
    event: CdpEvent,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ts == other.ts
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ts.cmp(&other.ts)
    }
}

#[derive(Default)]
struct ProfileBuffer {
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

/// A callback invoked once per drained event, in per-profile `ts` order.
/// Must be synchronous, bounded, in-memory work; a panic is caught and
/// logged, not propagated (§7 `HandlerException`).
pub type Handler = Arc<dyn Fn(CdpEvent, ProfileId) + Send + Sync>;

/// The per-profile reordering buffer with dual watermarks and dedup.
pub struct EventProcessor {
    processing_window: Duration,
    grace_period: Duration,
    clock: Arc<dyn Clock>,
    buffers: Mutex<HashMap<ProfileId, ProfileBuffer>>,
    dedup: Mutex<HashMap<ProfileId, Arc<DedupCache<String>>>>,
    dedup_ttl: Duration,
    dedup_capacity: usize,
    metrics: Arc<Metrics>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    stopped: Mutex<bool>,
}

impl EventProcessor {
    pub fn new(
        processing_window: Duration,
        grace_period: Duration,
        dedup_ttl: Duration,
        dedup_capacity: usize,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            processing_window,
            grace_period,
            clock,
            buffers: Mutex::new(HashMap::new()),
            dedup: Mutex::new(HashMap::new()),
            dedup_ttl,
            dedup_capacity,
            metrics,
            stop_tx,
            stop_rx,
            stopped: Mutex::new(false),
        })
    }

    fn dedup_cache_for(&self, profile_id: &ProfileId) -> Arc<DedupCache<String>> {
        let mut dedup = self.dedup.lock().expect("dedup map lock poisoned");
        dedup
            .entry(profile_id.clone())
            .or_insert_with(|| Arc::new(DedupCache::new(self.dedup_ttl, self.dedup_capacity)))
            .clone()
    }

    /// Admission policy from §4.4. Never blocks, never fails.
    pub fn submit(&self, event: CdpEvent, profile_id: ProfileId) {
        if *self.stopped.lock().expect("stopped flag lock poisoned") {
            return;
        }

        let now = self.clock.now();
        let dedup = self.dedup_cache_for(&profile_id);
        let seen_at = now.duration_since_epoch();

        // Step 1: dedup check (no mutation yet — an event rejected below for
        // lateness must never be marked seen, or a legitimate retry within
        // the grace window would be misclassified as a duplicate).
        if dedup.contains(&event.event_id, seen_at) {
            self.metrics.incr_dedup_hits();
            return;
        }

        // Step 2: grace cutoff.
        let grace_cutoff = now.saturating_sub(self.grace_period);
        if event.ts < grace_cutoff {
            self.metrics.incr_dropped_too_late();
            warn!(
                target: LOG_TARGET,
                profile_id = %profile_id,
                event_id = %event.event_id,
                event_ts = %event.ts,
                "event rejected: past grace period"
            );
            return;
        }

        // Step 3: processing cutoff (still buffered, just counted as late).
        let processing_cutoff = now.saturating_sub(self.processing_window);
        if event.ts < processing_cutoff {
            self.metrics.incr_late_accepted();
        }

        // Step 4: mark seen and buffer, now that the event is admissible.
        dedup.insert(event.event_id.clone(), seen_at);

        let mut buffers = self.buffers.lock().expect("buffer map lock poisoned");
        buffers
            .entry(profile_id)
            .or_default()
            .heap
            .push(Reverse(HeapEntry { ts: event.ts, event }));
        self.metrics.incr_buffered(1);
    }

    /// One tick: drains every profile's heap down to the processing
    /// watermark, invoking `handler` on each drained event in pop order.
    #[instrument(skip(self, handler))]
    pub fn tick(&self, handler: &Handler) {
        let now = self.clock.now();
        let watermark = now.saturating_sub(self.processing_window);

        let mut drained: Vec<(ProfileId, CdpEvent)> = Vec::new();
        {
            let mut buffers = self.buffers.lock().expect("buffer map lock poisoned");
            for (profile_id, buffer) in buffers.iter_mut() {
                while let Some(Reverse(entry)) = buffer.heap.peek() {
                    if entry.ts > watermark {
                        break;
                    }
                    let Reverse(entry) = buffer.heap.pop().expect("just peeked");
                    drained.push((profile_id.clone(), entry.event));
                }
            }
        }

        if drained.is_empty() {
            self.metrics.set_watermark_lag_ms(0);
            return;
        }

        self.metrics.incr_buffered(-(drained.len() as i64));
        self.metrics.incr_processed(drained.len() as u64);

        let lag_ms = now
            .checked_duration_since(watermark)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.metrics.set_watermark_lag_ms(lag_ms);

        for (profile_id, event) in drained {
            let handler = handler.clone();
            let event_id = event.event_id.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                handler(event, profile_id.clone());
            }));
            if let Err(payload) = result {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    target: LOG_TARGET,
                    profile_id = %profile_id,
                    event_id = %event_id,
                    panic = %message,
                    "handler panicked; event considered consumed"
                );
            }
        }
    }

    /// Spawns the ticker task: every `ticker_interval`, calls `tick` until
    /// `stop()` is observed.
    pub fn spawn(self: &Arc<Self>, handler: Handler, ticker_interval: Duration) -> JoinHandle<()> {
        let processor = self.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ticker_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        processor.tick(&handler);
                    }
                    res = stop_rx.changed() => {
                        if res.is_err() || *stop_rx.borrow() {
                            trace!(target: LOG_TARGET, "ticker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signals the ticker to stop. In-flight handler calls complete.
    /// Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops and wipes all buffered/dedup state. Test-only escape hatch.
    pub fn clear(&self) {
        self.stop();
        *self.stopped.lock().expect("stopped flag lock poisoned") = true;
        self.buffers.lock().expect("buffer map lock poisoned").clear();
        self.dedup.lock().expect("dedup map lock poisoned").clear();
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn event(id: &str, ts: Timestamp) -> CdpEvent {
        CdpEvent {
            event_id: id.to_string(),
            ts,
            kind: EventKind::Track,
            user_id: Some("u1".to_string()),
            email: None,
            anonymous_id: None,
            name: Some("X".to_string()),
            properties: Default::default(),
            traits: Default::default(),
        }
    }

    fn processor(clock: Arc<ManualClock>) -> Arc<EventProcessor> {
        EventProcessor::new(
            Duration::from_secs(5),
            Duration::from_secs(120),
            Duration::from_secs(600),
            10_000,
            clock,
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn out_of_order_events_drain_in_ts_order() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1000)));
        let processor = processor(clock.clone());

        let ts_values = [1010, 1030, 1050, 1020, 1040];
        for (i, secs) in ts_values.iter().enumerate() {
            processor.submit(
                event(&format!("e{i}"), Timestamp::from_secs(*secs)),
                "user:u1".to_string(),
            );
        }

        clock.advance(Duration::from_secs(60));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let handler_seen = seen.clone();
        let handler: Handler = Arc::new(move |event, _profile_id| {
            handler_seen.lock().unwrap().push(event.ts);
        });
        processor.tick(&handler);

        let seen = seen.lock().unwrap();
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(*seen, sorted);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn duplicate_event_id_is_handled_once() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1000)));
        let processor = processor(clock.clone());

        processor.submit(event("E", Timestamp::from_secs(940)), "user:u1".to_string());
        processor.submit(event("E", Timestamp::from_secs(940)), "user:u1".to_string());

        clock.advance(Duration::from_secs(60));

        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let handler: Handler = Arc::new(move |_event, _profile_id| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
        });
        processor.tick(&handler);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.metrics().dedup_hits(), 1);
    }

    #[test]
    fn too_late_event_is_dropped_without_buffering() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1000)));
        let processor = processor(clock.clone());

        processor.submit(event("E", Timestamp::from_secs(850)), "user:u1".to_string());

        assert_eq!(processor.metrics().dropped_too_late(), 1);
        assert_eq!(processor.metrics().buffered_events(), 0);

        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let handler: Handler = Arc::new(move |_event, _profile_id| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
        });
        processor.tick(&handler);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn too_late_event_does_not_mark_its_id_seen() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1000)));
        let processor = processor(clock.clone());

        // Rejected for lateness (ts = 850 < grace cutoff 880).
        processor.submit(event("E", Timestamp::from_secs(850)), "user:u1".to_string());
        assert_eq!(processor.metrics().dropped_too_late(), 1);
        assert_eq!(processor.metrics().dedup_hits(), 0);

        // A client retry of the same eventId, now within the grace window,
        // must be treated as fresh rather than a dedup hit.
        processor.submit(event("E", Timestamp::from_secs(940)), "user:u1".to_string());
        assert_eq!(processor.metrics().dedup_hits(), 0);
        assert_eq!(processor.metrics().buffered_events(), 1);

        clock.advance(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let handler: Handler = Arc::new(move |_event, _profile_id| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
        });
        processor.tick(&handler);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_panic_is_caught_and_does_not_stop_future_ticks() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1000)));
        let processor = processor(clock.clone());
        processor.submit(event("E", Timestamp::from_secs(940)), "user:u1".to_string());
        clock.advance(Duration::from_secs(60));

        let handler: Handler = Arc::new(|_event, _profile_id| {
            panic!("boom");
        });
        processor.tick(&handler);

        processor.submit(event("F", Timestamp::from_secs(1010)), "user:u1".to_string());
        clock.advance(Duration::from_secs(60));

        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let handler: Handler = Arc::new(move |_event, _profile_id| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
        });
        processor.tick(&handler);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn stop_halts_the_ticker_task() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1000)));
        let processor = processor(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let handler: Handler = Arc::new(move |_event, _profile_id| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
        });

        let join = processor.spawn(handler, Duration::from_millis(10));
        processor.stop();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("ticker should stop promptly")
            .expect("ticker task should not panic");
    }
}
