//! Pipeline configuration: defaults, a `bon` builder, and eager validation.
//!
//! Grounded on `Event::builder()`'s `#[bon::bon]` usage in
//! `rostra-core/src/event.rs`.

use std::sync::Arc;
use std::time::Duration;

use snafu::ensure;

use crate::clock::{Clock, SystemClock};
use crate::error::{
    ConfigResult, ProcessingWindowExceedsGracePeriodSnafu, ZeroCapacitySnafu, ZeroDurationSnafu,
};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub processing_window: Duration,
    pub grace_period: Duration,
    pub dedup_ttl: Duration,
    pub dedup_capacity: usize,
    pub ticker_interval: Duration,
    pub rolling_window: Duration,
    pub bucket_size: Duration,
    pub reengage_threshold: Duration,
    pub power_user_threshold: u64,
    pub power_user_window: Duration,
    pub segment_channel_capacity: usize,
    pub snapshot_channel_capacity: usize,
    pub clock: Arc<dyn Clock>,
}

#[bon::bon]
impl PipelineConfig {
    #[builder]
    pub fn new(
        #[builder(default = Duration::from_secs(5))] processing_window: Duration,
        #[builder(default = Duration::from_secs(120))] grace_period: Duration,
        #[builder(default = Duration::from_secs(600))] dedup_ttl: Duration,
        #[builder(default = 10_000)] dedup_capacity: usize,
        #[builder(default = Duration::from_secs(1))] ticker_interval: Duration,
        #[builder(default = Duration::from_secs(24 * 3600))] rolling_window: Duration,
        #[builder(default = Duration::from_secs(60))] bucket_size: Duration,
        #[builder(default = Duration::from_secs(600))] reengage_threshold: Duration,
        #[builder(default = 5)] power_user_threshold: u64,
        #[builder(default = Duration::from_secs(24 * 3600))] power_user_window: Duration,
        #[builder(default = 1_000)] segment_channel_capacity: usize,
        #[builder(default = 64)] snapshot_channel_capacity: usize,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        Self {
            processing_window,
            grace_period,
            dedup_ttl,
            dedup_capacity,
            ticker_interval,
            rolling_window,
            bucket_size,
            reengage_threshold,
            power_user_threshold,
            power_user_window,
            segment_channel_capacity,
            snapshot_channel_capacity,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
        }
    }

    /// Eagerly checks the invariants from §6/§7: `processingWindow <=
    /// gracePeriod`, every duration non-zero, every capacity non-zero.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure!(
            self.processing_window <= self.grace_period,
            ProcessingWindowExceedsGracePeriodSnafu {
                processing_window: self.processing_window,
                grace_period: self.grace_period,
            }
        );

        for (field, duration) in [
            ("processingWindow", self.processing_window),
            ("gracePeriod", self.grace_period),
            ("dedupTtl", self.dedup_ttl),
            ("tickerInterval", self.ticker_interval),
            ("rollingWindow", self.rolling_window),
            ("bucketSize", self.bucket_size),
            ("reengageThreshold", self.reengage_threshold),
            ("powerUserWindow", self.power_user_window),
        ] {
            ensure!(!duration.is_zero(), ZeroDurationSnafu { field });
        }

        for (field, capacity) in [
            ("dedupCapacity", self.dedup_capacity),
            ("segmentChannelCapacity", self.segment_channel_capacity),
            ("snapshotChannelCapacity", self.snapshot_channel_capacity),
        ] {
            ensure!(capacity > 0, ZeroCapacitySnafu { field });
        }
        ensure!(
            self.power_user_threshold > 0,
            ZeroCapacitySnafu {
                field: "powerUserThreshold"
            }
        );

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig::builder().build()
    }
}
