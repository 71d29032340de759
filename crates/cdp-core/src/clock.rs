//! Wall-clock instants and the injectable clock used everywhere "now" matters.
//!
//! Grounded on the teacher's design note that every subsystem consulting
//! "now" should take a clock abstraction, and on its own atomics-as-state
//! idiom (`client.rs`'s `NodeP2PState` tracks a `tokio::time::Instant` based
//! backoff deadline). Timestamps here are stored as nanoseconds since the
//! Unix epoch rather than wrapping `time::OffsetDateTime` directly, so
//! `Timestamp` gets cheap `Ord`/`Hash` without relying on `time`'s own
//! equality semantics.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// An instant in time, represented as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_offset_date_time(dt: OffsetDateTime) -> Self {
        let nanos = dt.unix_timestamp_nanos();
        Self(nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    pub fn to_offset_date_time(self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128)
            .expect("i64 nanos always fits OffsetDateTime's range")
    }

    /// Builds a `Timestamp` this many seconds after the epoch. Handy in
    /// tests (`Timestamp::from_secs(60)`).
    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        let nanos = d.as_nanos().min(i64::MAX as u128) as i64;
        Self(self.0.saturating_add(nanos))
    }

    pub fn saturating_sub(self, d: Duration) -> Self {
        let nanos = d.as_nanos().min(i64::MAX as u128) as i64;
        Self(self.0.saturating_sub(nanos))
    }

    /// `Some(self - earlier)` if `self >= earlier`, else `None`.
    pub fn checked_duration_since(self, earlier: Timestamp) -> Option<Duration> {
        if self.0 >= earlier.0 {
            Some(Duration::from_nanos((self.0 - earlier.0) as u64))
        } else {
            None
        }
    }

    /// Nanos-since-epoch as a non-negative `Duration`, clamping anything
    /// before the epoch to zero. Used to drive [`cdp_dedup_cache::DedupCache`],
    /// which is deliberately agnostic of this type.
    pub fn duration_since_epoch(self) -> Duration {
        Duration::from_nanos(self.0.max(0) as u64)
    }

    /// Floors this instant down to the nearest multiple of `bucket_size`.
    pub fn floor_to(self, bucket_size: Duration) -> Timestamp {
        let bucket_nanos = (bucket_size.as_nanos().max(1) as i64).max(1);
        Timestamp(self.0.div_euclid(bucket_nanos) * bucket_nanos)
    }

    pub(crate) fn as_nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_offset_date_time().format(&Rfc3339) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<invalid-timestamp:{}>", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let formatted = self
            .to_offset_date_time()
            .format(&Rfc3339)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let dt = OffsetDateTime::parse(&raw, &Rfc3339).map_err(serde::de::Error::custom)?;
        Ok(Timestamp::from_offset_date_time(dt))
    }
}

/// A source of "now", injected into every subsystem that needs one.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Production clock: reads the system wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_offset_date_time(OffsetDateTime::now_utc())
    }
}

/// Test clock: holds a fixed instant that can be read from many threads and
/// advanced or set explicitly. Never advances on its own.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: AtomicI64::new(start.as_nanos()),
        }
    }

    pub fn set(&self, t: Timestamp) {
        self.nanos.store(t.as_nanos(), Ordering::SeqCst);
    }

    pub fn advance(&self, d: Duration) {
        let delta = d.as_nanos().min(i64::MAX as u128) as i64;
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.nanos.load(Ordering::SeqCst))
    }
}
