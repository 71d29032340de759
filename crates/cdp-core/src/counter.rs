//! Per-(profile, event-name) time-bucketed rolling counters.
//!
//! Grounded on the bucketed-window vocabulary of
//! `other_examples/82eeb770_m0rs3c0d3-Glasswally__glasswally-src-state-window.rs.rs`
//! and the teacher's discipline of locking each series independently rather
//! than the whole store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::trace;

use crate::clock::Timestamp;
use crate::identity::ProfileId;

const LOG_TARGET: &str = "cdp::counter";

type SeriesKey = (ProfileId, String);

/// A single (profile, event-name) series: buckets keyed by bucket-start
/// instant (as epoch nanos, for `Ord`), counts as plain integers.
#[derive(Default)]
struct Series {
    buckets: BTreeMap<i64, u64>,
}

/// A read-only view over a counter usable by [`crate::segment::SegmentEngine`]
/// without depending on the concrete [`RollingCounter`] type.
pub trait CounterView {
    fn count(&self, profile_id: &ProfileId, name: &str, window: Duration, now: Timestamp) -> u64;
}

/// Time-bucketed rolling counter, independent per (profile, event name).
pub struct RollingCounter {
    bucket_size: Duration,
    retention: Duration,
    series: RwLock<HashMap<SeriesKey, Arc<Mutex<Series>>>>,
}

impl RollingCounter {
    pub fn new(bucket_size: Duration, retention: Duration) -> Self {
        Self {
            bucket_size,
            retention,
            series: RwLock::new(HashMap::new()),
        }
    }

    fn series_for(&self, profile_id: &ProfileId, name: &str) -> Arc<Mutex<Series>> {
        let key = (profile_id.clone(), name.to_string());
        if let Some(existing) = self.series.read().expect("counter lock poisoned").get(&key) {
            return existing.clone();
        }
        let mut series = self.series.write().expect("counter lock poisoned");
        series.entry(key).or_insert_with(|| Arc::new(Mutex::new(Series::default()))).clone()
    }

    /// Floors `ts` to the bucket boundary and increments that bucket by one.
    pub fn append(&self, profile_id: &ProfileId, name: &str, ts: Timestamp) {
        let series = self.series_for(profile_id, name);
        let bucket_start = ts.floor_to(self.bucket_size).as_nanos();
        let mut series = series.lock().expect("series lock poisoned");
        *series.buckets.entry(bucket_start).or_insert(0) += 1;
    }

    /// Sums counts across buckets in `[now - window, now]`. `window` is
    /// clamped to at most the configured retention.
    pub fn count(&self, profile_id: &ProfileId, name: &str, window: Duration, now: Timestamp) -> u64 {
        let effective_window = window.min(self.retention);
        let lower = now.saturating_sub(effective_window).as_nanos();
        let upper = now.as_nanos();

        let series = self.series_for(profile_id, name);
        let series = series.lock().expect("series lock poisoned");
        series
            .buckets
            .range(lower..=upper)
            .map(|(_, count)| *count)
            .sum()
    }

    /// A flat `{event name -> total over the configured retention}` snapshot,
    /// used to populate `CdpProfile.counters` for outbound listings.
    pub fn counts_snapshot(&self, profile_id: &ProfileId, now: Timestamp) -> HashMap<String, u64> {
        let retention = self.retention;
        let names: Vec<String> = self
            .series
            .read()
            .expect("counter lock poisoned")
            .keys()
            .filter(|(pid, _)| pid == profile_id)
            .map(|(_, name)| name.clone())
            .collect();

        names
            .into_iter()
            .map(|name| {
                let count = self.count(profile_id, &name, retention, now);
                (name, count)
            })
            .collect()
    }

    /// Drops buckets strictly older than `now - retention` for every known
    /// series (`profile_id = None`) or for a single profile's series.
    pub fn evict_old_buckets(&self, profile_id: Option<&ProfileId>, now: Timestamp) {
        let cutoff = now.saturating_sub(self.retention).as_nanos();
        let all_series: Vec<Arc<Mutex<Series>>> = {
            let guard = self.series.read().expect("counter lock poisoned");
            guard
                .iter()
                .filter(|(key, _)| profile_id.is_none_or(|p| &key.0 == p))
                .map(|(_, series)| series.clone())
                .collect()
        };

        let mut evicted = 0usize;
        for series in all_series {
            let mut series = series.lock().expect("series lock poisoned");
            let retained = series.buckets.split_off(&cutoff);
            evicted += series.buckets.len();
            series.buckets = retained;
        }
        if evicted > 0 {
            trace!(target: LOG_TARGET, evicted, "swept expired counter buckets");
        }
    }
}

impl CounterView for RollingCounter {
    fn count(&self, profile_id: &ProfileId, name: &str, window: Duration, now: Timestamp) -> u64 {
        RollingCounter::count(self, profile_id, name, window, now)
    }
}
