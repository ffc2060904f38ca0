//! The ingestion poller.
//!
//! One timer-driven task: every cycle it fans out to both upstream feeds
//! for every configured location, merges whatever arrived into enriched
//! samples, publishes them to the bus keyed by location, and appends them
//! to the raw log. The raw log write happens even when the bus rejects a
//! sample permanently, so the batch layer can always rebuild.

use super::backoff::BackoffPolicy;
use crate::bus::{MessageBus, PublishError};
use crate::config::{AppConfig, Location};
use crate::model::{is_peak_hour, local_date_hour, AqiCategory, LocationSample};
use crate::ops::{metrics, HealthState};
use crate::store::{PipelineStore, StoreError};
use crate::upstream::{FeedError, UpstreamFeeds};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Transient upstream failures are retried this many times within a cycle
/// before the metric is treated as absent.
const UPSTREAM_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub upstream_timeout: Duration,
    pub fanout_concurrency: usize,
    pub topic: String,
    pub publish_backoff: BackoffPolicy,
    pub raw_append_backoff: BackoffPolicy,
}

impl PollerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            upstream_timeout: config.upstream_timeout,
            fanout_concurrency: config.fanout_concurrency,
            topic: config.bus_topic.clone(),
            publish_backoff: BackoffPolicy::publish_default(),
            raw_append_backoff: BackoffPolicy::raw_append_default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Samples built and handed to the bus/raw-log path.
    pub emitted: usize,
    /// Locations that produced no metric at all this cycle.
    pub skipped: usize,
}

pub struct IngestionPoller {
    settings: PollerSettings,
    feeds: Arc<dyn UpstreamFeeds>,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn PipelineStore>,
    locations: Vec<Location>,
    local_offset: FixedOffset,
    peak_hours: Vec<u32>,
    limiter: Arc<Semaphore>,
    health: Arc<HealthState>,
}

impl IngestionPoller {
    pub fn new(
        settings: PollerSettings,
        feeds: Arc<dyn UpstreamFeeds>,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn PipelineStore>,
        locations: Vec<Location>,
        local_offset: FixedOffset,
        peak_hours: Vec<u32>,
        health: Arc<HealthState>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(settings.fanout_concurrency));
        Self {
            settings,
            feeds,
            bus,
            store,
            locations,
            local_offset,
            peak_hours,
            limiter,
            health,
        }
    }

    /// Timer loop. Cycles run inline, so there is never more than one
    /// active cycle; ticks that fire while a cycle is still running are
    /// skipped and counted as lag.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            locations = self.locations.len(),
            "Starting ingestion poller"
        );
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; wait one full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let started = std::time::Instant::now();
            let stats = self.run_cycle().await;
            let elapsed = started.elapsed();
            if elapsed > self.settings.poll_interval {
                metrics::INGEST_CYCLE_LAG_TOTAL.inc();
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Ingestion cycle overran the poll interval"
                );
            }
            self.health.mark_cycle();
            debug!(
                emitted = stats.emitted,
                skipped = stats.skipped,
                elapsed_ms = elapsed.as_millis() as u64,
                "Ingestion cycle finished"
            );
        }
        info!("Ingestion poller stopped");
    }

    /// One full cycle over every configured location.
    pub async fn run_cycle(&self) -> CycleStats {
        let fetched = futures::future::join_all(
            self.locations
                .iter()
                .map(|location| self.sample_location(location)),
        )
        .await;

        let mut stats = CycleStats::default();
        for (location, sample) in self.locations.iter().zip(fetched) {
            match sample {
                Some(sample) => {
                    metrics::INGEST_SAMPLES_TOTAL
                        .with_label_values(&[location.name.as_str()])
                        .inc();
                    self.emit(&sample).await;
                    stats.emitted += 1;
                }
                None => {
                    metrics::INGEST_LOCATION_FAILURES_TOTAL
                        .with_label_values(&[location.name.as_str()])
                        .inc();
                    stats.skipped += 1;
                }
            }
        }
        metrics::INGEST_CYCLES_TOTAL.inc();
        stats
    }

    /// Fetch both feeds concurrently and merge. A location is skipped only
    /// when neither feed produced a value; a single-feed outage never
    /// silences the other metric.
    async fn sample_location(&self, location: &Location) -> Option<LocationSample> {
        let (traffic, aqi) = tokio::join!(
            self.fetch_traffic(location),
            self.fetch_aqi(location)
        );
        if traffic.is_none() && aqi.is_none() {
            warn!(location = %location.name, "Both feeds failed, skipping location this cycle");
            return None;
        }
        Some(self.build_sample(location, traffic, aqi, Utc::now()))
    }

    fn build_sample(
        &self,
        location: &Location,
        traffic_level: Option<u8>,
        aqi_value: Option<u32>,
        timestamp: DateTime<Utc>,
    ) -> LocationSample {
        let (_, local_hour) = local_date_hour(timestamp, self.local_offset);
        LocationSample {
            timestamp,
            location: location.name.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            aqi_value,
            traffic_level,
            aqi_category: aqi_value.map(AqiCategory::from_aqi),
            is_peak_hour: is_peak_hour(local_hour, &self.peak_hours),
        }
    }

    async fn fetch_traffic(&self, location: &Location) -> Option<u8> {
        for attempt in 0..=UPSTREAM_RETRIES {
            let _permit = self.limiter.acquire().await.ok()?;
            match self
                .feeds
                .fetch_traffic(location, self.settings.upstream_timeout)
                .await
            {
                Ok(level) => return Some(level),
                Err(FeedError::Transient(reason)) => {
                    debug!(location = %location.name, attempt, "Transient traffic feed error: {}", reason);
                }
                Err(FeedError::Permanent(reason)) => {
                    debug!(location = %location.name, "Traffic feed has no value: {}", reason);
                    return None;
                }
            }
        }
        None
    }

    async fn fetch_aqi(&self, location: &Location) -> Option<u32> {
        for attempt in 0..=UPSTREAM_RETRIES {
            let _permit = self.limiter.acquire().await.ok()?;
            match self
                .feeds
                .fetch_aqi(location, self.settings.upstream_timeout)
                .await
            {
                Ok(aqi) => return Some(aqi),
                Err(FeedError::Transient(reason)) => {
                    debug!(location = %location.name, attempt, "Transient AQI feed error: {}", reason);
                }
                Err(FeedError::Permanent(reason)) => {
                    debug!(location = %location.name, "AQI feed has no value: {}", reason);
                    return None;
                }
            }
        }
        None
    }

    /// Publish to the bus, then append to the raw log. The raw log is the
    /// fallback path: it is written even when the bus drops the sample.
    async fn emit(&self, sample: &LocationSample) {
        let payload = match serde_json::to_vec(sample) {
            Ok(payload) => payload,
            Err(e) => {
                error!(location = %sample.location, "Failed to encode sample: {}", e);
                return;
            }
        };

        let backoff = &self.settings.publish_backoff;
        for retry in 0..backoff.max_attempts {
            match self
                .bus
                .publish(&self.settings.topic, &sample.location, &payload)
                .await
            {
                Ok(()) => break,
                Err(PublishError::Transient(reason)) => {
                    metrics::record_publish_failure("transient");
                    warn!(
                        location = %sample.location,
                        retry,
                        "Transient bus publish failure: {}",
                        reason
                    );
                    if retry + 1 < backoff.max_attempts {
                        tokio::time::sleep(backoff.delay_for(retry)).await;
                    } else {
                        warn!(location = %sample.location, "Publish retries exhausted, dropping from bus");
                    }
                }
                Err(PublishError::Permanent(reason)) => {
                    metrics::record_publish_failure("permanent");
                    warn!(
                        location = %sample.location,
                        "Permanent bus publish failure, dropping from bus: {}",
                        reason
                    );
                    break;
                }
            }
        }

        let backoff = &self.settings.raw_append_backoff;
        for retry in 0..backoff.max_attempts {
            match self.store.append_raw(sample) {
                Ok(()) => return,
                Err(StoreError::Unavailable(reason)) => {
                    warn!(
                        location = %sample.location,
                        retry,
                        "Raw log temporarily unavailable: {}",
                        reason
                    );
                    if retry + 1 < backoff.max_attempts {
                        tokio::time::sleep(backoff.delay_for(retry)).await;
                    }
                }
                Err(e) => {
                    error!(location = %sample.location, "Raw log append failed, dropping sample: {}", e);
                    return;
                }
            }
        }
        error!(
            location = %sample.location,
            "Raw log append failed after retries, dropping sample"
        );
    }
}
