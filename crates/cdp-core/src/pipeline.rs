//! Wires the identity graph, profile store, rolling counter, segment engine,
//! and event processor into one driveable pipeline, plus the outbound
//! snapshot listing.
//!
//! Grounded on `rostra-client-db/src/process_event_ops.rs`'s role as the
//! single entry point that threads one inbound event through several stores
//! and fires commit hooks/broadcasts.

use std::sync::Arc;
use std::time::Duration;

use cdp_util_error::FmtCompact;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{instrument, trace};

use crate::clock::Timestamp;
use crate::config::PipelineConfig;
use crate::counter::RollingCounter;
use crate::error::ConfigResult;
use crate::event::{CdpEvent, EventKind};
use crate::identity::{IdentityGraph, ProfileId};
use crate::metrics::Metrics;
use crate::processor::{EventProcessor, Handler};
use crate::profile::ProfileStore;
use crate::segment::{SegmentEngine, SegmentEvent, SegmentThresholds};

const LOG_TARGET: &str = "cdp::pipeline";

const SNAPSHOT_TOP_N: usize = 20;
const FEATURE_USED: &str = "Feature Used";

/// The namespace-stripped identifier sets of the outbound snapshot schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIdentifiers {
    pub user_ids: Vec<String>,
    pub emails: Vec<String>,
    pub anonymous_ids: Vec<String>,
}

/// The outbound, read-only profile view of §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub profile_id: ProfileId,
    pub plan: Option<String>,
    pub country: Option<String>,
    pub last_seen: Timestamp,
    pub identifiers: SnapshotIdentifiers,
    pub feature_used_count: u64,
}

/// Handles to the background tasks a running [`Pipeline`] owns. Dropping
/// this does not stop the tasks; call [`Pipeline::stop`] for that.
pub struct PipelineHandles {
    pub ticker: JoinHandle<()>,
    pub bucket_sweeper: JoinHandle<()>,
    pub snapshot_publisher: JoinHandle<()>,
}

/// The stream-processing core: consumes inbound events, resolves identity,
/// maintains profiles/counters/segments, and emits segment transitions and
/// throttled snapshots.
pub struct Pipeline {
    config: PipelineConfig,
    identity: Arc<IdentityGraph>,
    profiles: Arc<ProfileStore>,
    counters: Arc<RollingCounter>,
    segments: Arc<SegmentEngine>,
    processor: Arc<EventProcessor>,
    metrics: Arc<Metrics>,
    snapshot_tx: broadcast::Sender<Arc<Vec<ProfileSnapshot>>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> ConfigResult<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new());
        let processor = EventProcessor::new(
            config.processing_window,
            config.grace_period,
            config.dedup_ttl,
            config.dedup_capacity,
            config.clock.clone(),
            metrics.clone(),
        );
        let segments = Arc::new(SegmentEngine::new(
            SegmentThresholds {
                power_user_threshold: config.power_user_threshold,
                power_user_window: config.power_user_window,
                reengage_threshold: config.reengage_threshold,
            },
            config.segment_channel_capacity,
        ));
        let (snapshot_tx, _) = broadcast::channel(config.snapshot_channel_capacity);
        let counters = Arc::new(RollingCounter::new(config.bucket_size, config.rolling_window));

        Ok(Arc::new(Self {
            config,
            identity: Arc::new(IdentityGraph::new()),
            profiles: Arc::new(ProfileStore::new()),
            counters,
            segments,
            processor,
            metrics,
            snapshot_tx,
        }))
    }

    /// Submits one inbound event for eventual processing. Non-blocking,
    /// infallible; admission/dedup/lateness policy is applied inside the
    /// processor (§4.4).
    pub fn submit(self: &Arc<Self>, event: CdpEvent) {
        let identifiers = event.tagged_identifiers();
        if identifiers.is_empty() {
            // CdpEvent::validate should have rejected this at the boundary;
            // defended here since identity resolution cannot proceed without it.
            return;
        }
        let refs: Vec<&str> = identifiers.iter().map(String::as_str).collect();
        let profile_id = match self.identity.canonical_id_for(&refs) {
            Ok(id) => id,
            Err(error) => {
                tracing::error!(
                    target: LOG_TARGET,
                    err = %error.fmt_compact(),
                    "failed to resolve identity for submitted event"
                );
                return;
            }
        };
        self.processor.submit(event, profile_id);
    }

    /// The handler invoked by the ticker for each drained event: steps 1-6
    /// of §4.6.
    fn drain_handler(self: &Arc<Self>) -> Handler {
        let pipeline = self.clone();
        Arc::new(move |event: CdpEvent, profile_id: ProfileId| {
            pipeline.apply_drained_event(event, profile_id);
        })
    }

    #[instrument(skip(self, event))]
    fn apply_drained_event(self: &Arc<Self>, event: CdpEvent, profile_id: ProfileId) {
        let normalized: Vec<String> = event
            .tagged_identifiers()
            .into_iter()
            .map(|id| crate::identity::normalize(&id))
            .collect();
        self.profiles.merge_identifiers(&profile_id, &normalized);

        if !event.traits.is_empty() {
            self.profiles.merge_traits(&profile_id, &event.traits, event.ts);
        }

        self.profiles.update_last_seen(&profile_id, event.ts);

        if event.kind == EventKind::Track {
            if let Some(name) = event.name.as_deref() {
                self.counters.append(&profile_id, name, event.ts);
            }
        }

        let now = self.config.clock.now();
        let counters_snapshot = self.counters.counts_snapshot(&profile_id, now);
        self.profiles.update_counters(&profile_id, counters_snapshot);

        let profile = self.profiles.get_or_create(&profile_id);
        let current_segments = self
            .segments
            .evaluate_and_emit(&profile, self.counters.as_ref(), now);
        self.profiles.update_segments(&profile_id, current_segments);
    }

    /// Spawns the ticker, bucket-sweeper, and snapshot-publisher background
    /// tasks. The returned handles are purely observational; call
    /// [`Pipeline::stop`] to actually stop them.
    pub fn spawn(self: &Arc<Self>) -> PipelineHandles {
        let ticker = self
            .processor
            .spawn(self.drain_handler(), self.config.ticker_interval);
        let bucket_sweeper = self.spawn_bucket_sweeper();
        let snapshot_publisher = self.spawn_snapshot_publisher(None);

        PipelineHandles {
            ticker,
            bucket_sweeper,
            snapshot_publisher,
        }
    }

    /// Periodic sweep dropping rolling-counter buckets older than the
    /// retention window, independent of the hot append path (§4.3).
    fn spawn_bucket_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = self.clone();
        let mut stop_rx = self.processor.stop_signal();
        let sweep_interval = (self.config.rolling_window / 24).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = pipeline.config.clock.now();
                        pipeline.counters.evict_old_buckets(None, now);
                        trace!(target: LOG_TARGET, "bucket sweep completed");
                    }
                    res = stop_rx.changed() => {
                        if res.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Periodic throttled publication of the top-20 profile snapshot (by
    /// `lastSeen` descending) to `snapshot_subscribe`rs. Defaults to reusing
    /// `tickerInterval`; `override_interval` lets a host choose a different
    /// cadence (§4.6, §9 decision 6).
    pub fn spawn_snapshot_publisher(
        self: &Arc<Self>,
        override_interval: Option<Duration>,
    ) -> JoinHandle<()> {
        let pipeline = self.clone();
        let mut stop_rx = self.processor.stop_signal();
        let interval_duration = override_interval.unwrap_or(self.config.ticker_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let snapshot = Arc::new(pipeline.snapshot_top20());
                        let _ = pipeline.snapshot_tx.send(snapshot);
                    }
                    res = stop_rx.changed() => {
                        if res.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stops every background task. Idempotent.
    pub fn stop(&self) {
        self.processor.stop();
    }

    pub fn subscribe_segment_events(&self) -> broadcast::Receiver<SegmentEvent> {
        self.segments.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Arc<Vec<ProfileSnapshot>>> {
        self.snapshot_tx.subscribe()
    }

    pub fn get_profile(&self, profile_id: &ProfileId) -> Option<crate::profile::CdpProfile> {
        self.profiles.get(profile_id)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Builds the top-20-by-`lastSeen` outbound snapshot listing on demand.
    pub fn snapshot_top20(&self) -> Vec<ProfileSnapshot> {
        let profiles = self
            .profiles
            .get_all()
            .into_iter()
            .sorted_by_key(|profile| std::cmp::Reverse(profile.last_seen))
            .take(SNAPSHOT_TOP_N);

        profiles
            .map(|profile| ProfileSnapshot {
                profile_id: profile.profile_id.clone(),
                plan: profile
                    .traits
                    .get("plan")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                country: profile
                    .traits
                    .get("country")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                last_seen: profile.last_seen,
                identifiers: SnapshotIdentifiers {
                    user_ids: profile.identifiers.user_ids.into_iter().collect(),
                    emails: profile.identifiers.emails.into_iter().collect(),
                    anonymous_ids: profile.identifiers.anonymous_ids.into_iter().collect(),
                },
                feature_used_count: *profile.counters.get(FEATURE_USED).unwrap_or(&0),
            })
            .collect()
    }
}
