//! Deduplicating membership cache
//!
//! This cache is designed for idempotency checks on a stream of keyed items
//! (e.g. client-retried event identifiers): [`DedupCache::check_and_insert`]
//! reports whether a key has already been seen, inserting it if not. Callers
//! that must gate "mark as seen" on other admission criteria can instead
//! call [`DedupCache::contains`] and [`DedupCache::insert`] separately.
//!
//! Entries expire after a fixed TTL. Because the TTL is constant, insertion
//! order and expiry order coincide, so a single queue tracks both expiry and
//! capacity eviction: the oldest entry is also the first to expire and the
//! first to be evicted under capacity pressure.
//!
//! Time is supplied by the caller as a [`Duration`] since an arbitrary fixed
//! point (usually the Unix epoch) rather than read from the system clock, so
//! the cache stays agnostic of any particular clock abstraction and is
//! trivial to drive deterministically in tests.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;


struct Inner<T> {
    set: HashSet<T>,
    order: VecDeque<(T, Duration)>,
}

/// A TTL + bounded-capacity set of recently-seen keys.
pub struct DedupCache<T> {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> DedupCache<T>
where
    T: Eq + Hash + Clone,
{
    /// Creates a cache that forgets entries older than `ttl` and never holds
    /// more than `capacity` resident entries.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(Inner {
                set: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Checks whether `key` was already present (a duplicate), inserting it
    /// if not. Does **not** refresh the TTL of an existing entry on a hit.
    ///
    /// Returns `true` if `key` was a duplicate (already resident and not yet
    /// expired), `false` if it was newly inserted.
    pub fn check_and_insert(&self, key: T, now: Duration) -> bool {
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");

        self.evict_expired_locked(&mut inner, now);

        if inner.set.contains(&key) {
            return true;
        }

        self.insert_locked(&mut inner, key, now);
        false
    }

    /// Checks whether `key` is currently resident, evicting expired entries
    /// first, without marking it seen. Callers that need to gate `key`'s
    /// admission on other criteria before committing to "seen" (e.g. a
    /// lateness check that must run before dedup marks an event) should use
    /// this plus a later [`DedupCache::insert`] instead of
    /// [`DedupCache::check_and_insert`].
    pub fn contains(&self, key: &T, now: Duration) -> bool {
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");
        self.evict_expired_locked(&mut inner, now);
        inner.set.contains(key)
    }

    /// Marks `key` as seen, evicting expired entries first and the oldest
    /// resident entry if at capacity. Assumes the caller already confirmed
    /// `key` isn't resident (via [`DedupCache::contains`]); inserting an
    /// already-resident key pushes a second entry onto the expiry queue.
    pub fn insert(&self, key: T, now: Duration) {
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");
        self.evict_expired_locked(&mut inner, now);
        self.insert_locked(&mut inner, key, now);
    }

    fn insert_locked(&self, inner: &mut Inner<T>, key: T, now: Duration) {
        if inner.order.len() >= self.capacity {
            if let Some((oldest, _)) = inner.order.pop_front() {
                inner.set.remove(&oldest);
            }
        }
        inner.set.insert(key.clone());
        inner.order.push_back((key, now));
    }

    fn evict_expired_locked(&self, inner: &mut Inner<T>, now: Duration) {
        while let Some((_, inserted_at)) = inner.order.front() {
            if self.ttl <= now.saturating_sub(*inserted_at) {
                let (key, _) = inner.order.pop_front().expect("just peeked");
                inner.set.remove(&key);
            } else {
                break;
            }
        }
    }

    /// Drops every expired entry without requiring a subsequent insert.
    pub fn evict_expired(&self, now: Duration) {
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");
        self.evict_expired_locked(&mut inner, now);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("dedup cache lock poisoned").set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipes all entries. Test-only escape hatch, mirrors `EventProcessor::clear`.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");
        inner.set.clear();
        inner.order.clear();
    }
}
