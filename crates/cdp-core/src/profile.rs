//! The profile store: canonical profiles keyed by [`ProfileId`], with LWW
//! trait merging and monotonic `lastSeen`.
//!
//! Grounded on `client.rs`'s `P2PState` (`RwLock<HashMap<K, V>>` with a
//! per-entry mutation closure) and `rostra-client-db`'s `WotData`. Profile
//! mutation here never awaits, so the per-profile lock is a plain
//! `std::sync::Mutex` rather than the teacher's `tokio::sync::RwLock`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;

use crate::clock::Timestamp;
use crate::identity::ProfileId;

/// The three identifier namespaces tracked per profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSets {
    pub user_ids: HashSet<String>,
    pub emails: HashSet<String>,
    pub anonymous_ids: HashSet<String>,
}

impl IdentifierSets {
    /// Inserts a single normalized identifier (e.g. `user:alice`) into its
    /// matching set, stripping the namespace prefix for storage.
    pub fn insert_normalized(&mut self, normalized: &str) {
        if let Some(value) = normalized.strip_prefix("user:") {
            self.user_ids.insert(value.to_string());
        } else if let Some(value) = normalized.strip_prefix("email:") {
            self.emails.insert(value.to_string());
        } else if let Some(value) = normalized.strip_prefix("anon:") {
            self.anonymous_ids.insert(value.to_string());
        }
    }

    fn merge_from(&mut self, other: &IdentifierSets) {
        self.user_ids.extend(other.user_ids.iter().cloned());
        self.emails.extend(other.emails.iter().cloned());
        self.anonymous_ids
            .extend(other.anonymous_ids.iter().cloned());
    }
}

/// A canonical customer profile, the unit of state the pipeline maintains.
#[derive(Debug, Clone)]
pub struct CdpProfile {
    pub profile_id: ProfileId,
    pub identifiers: IdentifierSets,
    pub traits: HashMap<String, Value>,
    pub counters: HashMap<String, u64>,
    pub segments: HashSet<&'static str>,
    pub last_seen: Timestamp,
}

impl CdpProfile {
    fn new(profile_id: ProfileId) -> Self {
        Self {
            profile_id,
            identifiers: IdentifierSets::default(),
            traits: HashMap::new(),
            counters: HashMap::new(),
            segments: HashSet::new(),
            last_seen: Timestamp::EPOCH,
        }
    }
}

/// Internal per-profile state: the profile plus the trait-write timestamps
/// needed to enforce LWW.
struct ProfileRecord {
    profile: CdpProfile,
    trait_timestamps: HashMap<String, Timestamp>,
}

impl ProfileRecord {
    fn new(profile_id: ProfileId) -> Self {
        Self {
            profile: CdpProfile::new(profile_id),
            trait_timestamps: HashMap::new(),
        }
    }
}

/// Concurrent-safe store of profiles by canonical id.
///
/// The top-level map is guarded by an `RwLock`; each profile additionally
/// has its own `Mutex` so compound per-profile operations (merge traits,
/// then update `lastSeen`) can be serialized without taking the top-level
/// write lock.
#[derive(Default)]
pub struct ProfileStore {
    records: RwLock<HashMap<ProfileId, Arc<Mutex<ProfileRecord>>>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, profile_id: &ProfileId) -> Arc<Mutex<ProfileRecord>> {
        if let Some(existing) = self
            .records
            .read()
            .expect("profile store lock poisoned")
            .get(profile_id)
        {
            return existing.clone();
        }

        let mut records = self.records.write().expect("profile store lock poisoned");
        records
            .entry(profile_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ProfileRecord::new(profile_id.clone()))))
            .clone()
    }

    /// Returns the profile, creating a default one if unseen.
    pub fn get_or_create(&self, profile_id: &ProfileId) -> CdpProfile {
        let record = self.entry(profile_id);
        record
            .lock()
            .expect("profile record lock poisoned")
            .profile
            .clone()
    }

    pub fn get(&self, profile_id: &ProfileId) -> Option<CdpProfile> {
        let record = self
            .records
            .read()
            .expect("profile store lock poisoned")
            .get(profile_id)?
            .clone();
        Some(record.lock().expect("profile record lock poisoned").profile.clone())
    }

    pub fn get_all(&self) -> Vec<CdpProfile> {
        let records: Vec<_> = self
            .records
            .read()
            .expect("profile store lock poisoned")
            .values()
            .cloned()
            .collect();
        records
            .into_iter()
            .map(|r| r.lock().expect("profile record lock poisoned").profile.clone())
            .collect()
    }

    /// Unions `new_identifiers` (already-normalized strings) into the
    /// profile's identifier sets.
    pub fn merge_identifiers(&self, profile_id: &ProfileId, new_identifiers: &[String]) {
        let record = self.entry(profile_id);
        let mut record = record.lock().expect("profile record lock poisoned");
        let mut incoming = IdentifierSets::default();
        for id in new_identifiers {
            incoming.insert_normalized(id);
        }
        record.profile.identifiers.merge_from(&incoming);
    }

    /// Applies each trait write if `event_ts >= storedTs` for that key (or
    /// the key is unseen). Older writes are silently dropped per-key.
    pub fn merge_traits(
        &self,
        profile_id: &ProfileId,
        new_traits: &serde_json::Map<String, Value>,
        event_ts: Timestamp,
    ) {
        let record = self.entry(profile_id);
        let mut record = record.lock().expect("profile record lock poisoned");
        for (key, value) in new_traits {
            let accept = match record.trait_timestamps.get(key) {
                Some(&stored) => event_ts >= stored,
                None => true,
            };
            if accept {
                record.profile.traits.insert(key.clone(), value.clone());
                record.trait_timestamps.insert(key.clone(), event_ts);
            }
        }
    }

    pub fn update_last_seen(&self, profile_id: &ProfileId, ts: Timestamp) {
        let record = self.entry(profile_id);
        let mut record = record.lock().expect("profile record lock poisoned");
        record.profile.last_seen = record.profile.last_seen.max(ts);
    }

    pub fn update_counters(&self, profile_id: &ProfileId, snapshot: HashMap<String, u64>) {
        let record = self.entry(profile_id);
        record.lock().expect("profile record lock poisoned").profile.counters = snapshot;
    }

    pub fn update_segments(&self, profile_id: &ProfileId, segments: HashSet<&'static str>) {
        let record = self.entry(profile_id);
        record.lock().expect("profile record lock poisoned").profile.segments = segments;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_or_create_returns_default_profile() {
        let store = ProfileStore::new();
        let profile = store.get_or_create(&"user:alice".to_string());
        assert!(profile.traits.is_empty());
        assert_eq!(profile.last_seen, Timestamp::EPOCH);
    }

    #[test]
    fn merge_identifiers_strips_namespace_for_storage() {
        let store = ProfileStore::new();
        let id = "user:alice".to_string();
        store.merge_identifiers(&id, &["user:alice".to_string(), "email:a@b.com".to_string()]);
        let profile = store.get(&id).expect("present");
        assert!(profile.identifiers.user_ids.contains("alice"));
        assert!(profile.identifiers.emails.contains("a@b.com"));
    }

    #[test]
    fn merge_traits_applies_newer_write() {
        let store = ProfileStore::new();
        let id = "user:alice".to_string();
        let mut traits = serde_json::Map::new();
        traits.insert("plan".to_string(), json!("pro"));
        store.merge_traits(&id, &traits, Timestamp::from_secs(10));
        assert_eq!(store.get(&id).unwrap().traits["plan"], json!("pro"));
    }

    #[test]
    fn merge_traits_drops_strictly_older_write() {
        let store = ProfileStore::new();
        let id = "user:alice".to_string();

        let mut newer = serde_json::Map::new();
        newer.insert("plan".to_string(), json!("pro"));
        store.merge_traits(&id, &newer, Timestamp::from_secs(10));

        let mut older = serde_json::Map::new();
        older.insert("plan".to_string(), json!("basic"));
        store.merge_traits(&id, &older, Timestamp::from_secs(0));

        assert_eq!(store.get(&id).unwrap().traits["plan"], json!("pro"));
    }

    #[test]
    fn merge_traits_tie_accepts_new_write() {
        let store = ProfileStore::new();
        let id = "user:alice".to_string();

        let mut first = serde_json::Map::new();
        first.insert("plan".to_string(), json!("basic"));
        store.merge_traits(&id, &first, Timestamp::from_secs(10));

        let mut second = serde_json::Map::new();
        second.insert("plan".to_string(), json!("pro"));
        store.merge_traits(&id, &second, Timestamp::from_secs(10));

        assert_eq!(store.get(&id).unwrap().traits["plan"], json!("pro"));
    }

    #[test]
    fn update_last_seen_is_monotonic() {
        let store = ProfileStore::new();
        let id = "user:alice".to_string();
        store.update_last_seen(&id, Timestamp::from_secs(10));
        store.update_last_seen(&id, Timestamp::from_secs(5));
        assert_eq!(store.get(&id).unwrap().last_seen, Timestamp::from_secs(10));
    }

    #[test]
    fn get_all_lists_every_created_profile() {
        let store = ProfileStore::new();
        store.get_or_create(&"user:alice".to_string());
        store.get_or_create(&"user:bob".to_string());
        assert_eq!(store.get_all().len(), 2);
    }
}
