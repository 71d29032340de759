//! The fixed segment catalog and the diff-based ENTER/EXIT transition
//! emitter.
//!
//! Grounded on `rostra-client-db`'s `broadcast::channel` + `_subscribe()`
//! pattern (`new_content_tx`/`new_heads_subscribe`).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::Timestamp;
use crate::counter::CounterView;
use crate::identity::ProfileId;
use crate::profile::CdpProfile;

pub const POWER_USER: &str = "power_user";
pub const PRO_PLAN: &str = "pro_plan";
pub const REENGAGE: &str = "reengage";

const FEATURE_USED: &str = "Feature Used";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentAction {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEvent {
    pub profile_id: ProfileId,
    pub segment: &'static str,
    pub action: SegmentAction,
    pub ts: Timestamp,
}

/// Thresholds the segment catalog is evaluated against. Mirrors the
/// relevant subset of [`crate::config::PipelineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SegmentThresholds {
    pub power_user_threshold: u64,
    pub power_user_window: Duration,
    pub reengage_threshold: Duration,
}

/// Evaluates the fixed segment catalog for a profile and emits ENTER/EXIT
/// transitions relative to the last-observed membership set.
pub struct SegmentEngine {
    thresholds: SegmentThresholds,
    previous: Mutex<HashMap<ProfileId, HashSet<&'static str>>>,
    sender: broadcast::Sender<SegmentEvent>,
}

impl SegmentEngine {
    pub fn new(thresholds: SegmentThresholds, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            thresholds,
            previous: Mutex::new(HashMap::new()),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SegmentEvent> {
        self.sender.subscribe()
    }

    /// Pure evaluation of the fixed segment catalog against one profile.
    pub fn evaluate(
        &self,
        profile: &CdpProfile,
        counter_view: &dyn CounterView,
        now: Timestamp,
    ) -> HashSet<&'static str> {
        let mut current = HashSet::new();

        let feature_used_count = counter_view.count(
            &profile.profile_id,
            FEATURE_USED,
            self.thresholds.power_user_window,
            now,
        );
        if feature_used_count >= self.thresholds.power_user_threshold {
            current.insert(POWER_USER);
        }

        if profile
            .traits
            .get("plan")
            .and_then(|v| v.as_str())
            .is_some_and(|plan| plan == "pro")
        {
            current.insert(PRO_PLAN);
        }

        if let Some(since_last_seen) = now.checked_duration_since(profile.last_seen) {
            if since_last_seen > self.thresholds.reengage_threshold {
                current.insert(REENGAGE);
            }
        }

        current
    }

    /// Evaluates, diffs against the profile's prior membership, publishes
    /// ENTER/EXIT events for the difference, then records the new set as
    /// prior. Returns the current membership set.
    pub fn evaluate_and_emit(
        &self,
        profile: &CdpProfile,
        counter_view: &dyn CounterView,
        now: Timestamp,
    ) -> HashSet<&'static str> {
        let current = self.evaluate(profile, counter_view, now);

        let mut previous = self.previous.lock().expect("segment engine lock poisoned");
        let prior = previous
            .get(&profile.profile_id)
            .cloned()
            .unwrap_or_default();

        for entered in current.difference(&prior) {
            let _ = self.sender.send(SegmentEvent {
                profile_id: profile.profile_id.clone(),
                segment: entered,
                action: SegmentAction::Enter,
                ts: now,
            });
        }
        for exited in prior.difference(&current) {
            let _ = self.sender.send(SegmentEvent {
                profile_id: profile.profile_id.clone(),
                segment: exited,
                action: SegmentAction::Exit,
                ts: now,
            });
        }

        previous.insert(profile.profile_id.clone(), current.clone());
        current
    }
}
