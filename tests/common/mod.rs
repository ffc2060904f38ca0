//! Common test infrastructure
//!
//! A `TestPipeline` wires the real components together against a temporary
//! database, the in-process bus and scripted upstream feeds, so tests can
//! drive whole ingestion cycles and batch windows deterministically.
#![allow(dead_code)]

use chrono::FixedOffset;
use citypulse_pipeline::batch::JobContext;
use citypulse_pipeline::bus::{BusSettings, MessageBus, PartitionedBus, RecordHandler};
use citypulse_pipeline::config::{AppConfig, Location};
use citypulse_pipeline::ingestion::{BackoffPolicy, IngestionPoller, PollerSettings};
use citypulse_pipeline::ops::HealthState;
use citypulse_pipeline::serving::ServingLayer;
use citypulse_pipeline::speed::SpeedProcessor;
use citypulse_pipeline::store::{PipelineStore, SqliteStore};
use citypulse_pipeline::upstream::ScriptedFeeds;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "traffic-aqi-data";
pub const LOCATION_A: &str = "Sudirman";
pub const LOCATION_B: &str = "Thamrin";

pub const PEAK_HOURS: &[u32] = &[6, 7, 8, 9, 16, 17, 18, 19];

pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap()
}

pub fn test_locations() -> Vec<Location> {
    vec![
        Location {
            name: LOCATION_A.to_string(),
            station_id: "A100001".to_string(),
            latitude: -6.21,
            longitude: 106.82,
        },
        Location {
            name: LOCATION_B.to_string(),
            station_id: "A100002".to_string(),
            latitude: -6.19,
            longitude: 106.82,
        },
    ]
}

pub struct TestPipeline {
    pub store: Arc<SqliteStore>,
    pub bus: Arc<PartitionedBus>,
    pub feeds: Arc<ScriptedFeeds>,
    pub poller: IngestionPoller,
    pub processor: Arc<SpeedProcessor>,
    pub serving: ServingLayer,
    pub cancel: CancellationToken,
    consumer_handles: Vec<JoinHandle<()>>,
    _db_dir: TempDir,
}

impl TestPipeline {
    /// Build the full pipeline and attach the speed-layer consumer.
    pub fn spawn() -> Self {
        let db_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(db_dir.path().join("pipeline.db")).unwrap());
        let bus = Arc::new(PartitionedBus::new(BusSettings {
            topic: TOPIC.to_string(),
            partitions: 4,
            redelivery_delay: Duration::from_millis(5),
            redelivery_delay_cap: Duration::from_millis(50),
            ..BusSettings::default()
        }));
        let feeds = Arc::new(ScriptedFeeds::new());

        let health = Arc::new(HealthState::new(
            Duration::from_secs(15),
            Duration::from_secs(60),
        ));
        let settings = PollerSettings {
            poll_interval: Duration::from_secs(15),
            upstream_timeout: Duration::from_millis(200),
            fanout_concurrency: 8,
            topic: TOPIC.to_string(),
            publish_backoff: BackoffPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                multiplier: 2.0,
            },
            raw_append_backoff: BackoffPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                multiplier: 2.0,
            },
        };
        let poller = IngestionPoller::new(
            settings,
            feeds.clone(),
            bus.clone(),
            store.clone(),
            test_locations(),
            local_offset(),
            PEAK_HOURS.to_vec(),
            health,
        );

        let processor = Arc::new(SpeedProcessor::new(
            store.clone() as Arc<dyn PipelineStore>,
            local_offset(),
            PEAK_HOURS.to_vec(),
        ));

        let serving = ServingLayer::new(store.clone() as Arc<dyn PipelineStore>, &test_config());

        let cancel = CancellationToken::new();
        let consumer_handles = bus
            .subscribe(
                TOPIC,
                "speed-layer",
                processor.clone() as Arc<dyn RecordHandler>,
                cancel.clone(),
            )
            .unwrap();

        Self {
            store,
            bus,
            feeds,
            poller,
            processor,
            serving,
            cancel,
            consumer_handles,
            _db_dir: db_dir,
        }
    }

    pub fn job_context(&self) -> JobContext {
        JobContext::new(
            self.store.clone() as Arc<dyn PipelineStore>,
            local_offset(),
            PEAK_HOURS.to_vec(),
            self.cancel.child_token(),
        )
    }

    /// Wait until the consumer workers have drained everything published so
    /// far. Polling is crude but keeps the tests free of timing knobs.
    pub async fn drain(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.consumer_handles {
            let _ = handle.await;
        }
    }
}

/// AppConfig for serving-layer construction: required keys only, defaults
/// elsewhere, with the test locations instead of the built-in set.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::resolve(|name| match name {
        "TOMTOM_API_KEY" => Some("test-key".to_string()),
        "AQICN_TOKEN" => Some("test-token".to_string()),
        _ => None,
    })
    .unwrap();
    config.locations = test_locations();
    config
}
