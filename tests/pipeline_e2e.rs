//! End-to-end pipeline scenarios: ingestion through the bus into the speed
//! layer, batch rebuilds over the raw log, and the serving layer's tiered
//! fallback.

mod common;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use citypulse_pipeline::batch::jobs::{analyze_peaks, rebuild_hour};
use citypulse_pipeline::bus::MessageBus;
use citypulse_pipeline::model::{local_date_hour, AqiCategory, LocationSample};
use citypulse_pipeline::serving::SourceTier;
use citypulse_pipeline::store::{HourlyAggregation, PipelineStore};
use citypulse_pipeline::upstream::FeedError;
use common::{local_offset, TestPipeline, LOCATION_A, LOCATION_B, PEAK_HOURS, TOPIC};
use std::time::Duration;

fn sample(location: &str, ts: DateTime<Utc>, aqi: Option<u32>, traffic: Option<u8>) -> LocationSample {
    LocationSample {
        timestamp: ts,
        location: location.to_string(),
        latitude: -6.2,
        longitude: 106.8,
        aqi_value: aqi,
        traffic_level: traffic,
        aqi_category: aqi.map(AqiCategory::from_aqi),
        is_peak_hour: false,
    }
}

async fn publish(pipeline: &TestPipeline, sample: &LocationSample) {
    let payload = serde_json::to_vec(sample).unwrap();
    pipeline
        .bus
        .publish(TOPIC, &sample.location, &payload)
        .await
        .unwrap();
}

/// Scenario: steady state. Two locations at the same instant flow through
/// the speed path into correctly-bucketed hourly rows.
#[tokio::test]
async fn test_steady_state_hourly_rows() {
    let pipeline = TestPipeline::spawn();
    let ts = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap();

    publish(&pipeline, &sample(LOCATION_A, ts, Some(45), Some(2))).await;
    publish(&pipeline, &sample(LOCATION_B, ts, Some(120), Some(4))).await;
    pipeline.drain().await;

    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let rows = pipeline.store.fetch_hourly_for_date(date).unwrap();
    assert_eq!(rows.len(), 2);

    // 06:00Z is 13:00 local; 13 is not a peak hour.
    let row_a = rows.iter().find(|r| r.location == LOCATION_A).unwrap();
    assert_eq!(row_a.hour, 13);
    assert_eq!(row_a.avg_aqi_value, Some(45.0));
    assert_eq!(row_a.avg_traffic_level, Some(2.0));
    assert!(!row_a.is_peak_hour);

    let row_b = rows.iter().find(|r| r.location == LOCATION_B).unwrap();
    assert_eq!(row_b.hour, 13);
    assert_eq!(row_b.avg_aqi_value, Some(120.0));
    assert_eq!(row_b.avg_traffic_level, Some(4.0));
    assert!(!row_b.is_peak_hour);

    // Realtime rows carry the derived categories.
    let realtime = pipeline
        .store
        .fetch_recent_realtime(ts - chrono::Duration::hours(1))
        .unwrap();
    let rt_a = realtime.iter().find(|r| r.location == LOCATION_A).unwrap();
    assert_eq!(rt_a.aqi_category, Some(AqiCategory::Good));
    let rt_b = realtime.iter().find(|r| r.location == LOCATION_B).unwrap();
    assert_eq!(rt_b.aqi_category, Some(AqiCategory::UnhealthySensitive));

    pipeline.shutdown().await;
}

/// Scenario: missing metric. The AQI feed fails transiently for the whole
/// cycle; the sample still flows with traffic only and the hourly AQI
/// average stays untouched.
#[tokio::test]
async fn test_missing_metric_cycle() {
    let pipeline = TestPipeline::spawn();

    for _ in 0..3 {
        pipeline
            .feeds
            .push_aqi(LOCATION_A, Err(FeedError::Transient("timeout".to_string())));
    }
    pipeline.feeds.set_steady_traffic(LOCATION_A, 3);
    pipeline.feeds.set_steady_traffic(LOCATION_B, 2);
    pipeline.feeds.set_steady_aqi(LOCATION_B, 80);

    let stats = pipeline.poller.run_cycle().await;
    assert_eq!(stats.emitted, 2);
    pipeline.drain().await;

    // The raw record mirrors the absent metric.
    let raws = pipeline.store.fetch_latest_raw_per_location().unwrap();
    let raw_a = raws.iter().find(|r| r.location == LOCATION_A).unwrap();
    assert_eq!(raw_a.aqi_value, None);
    assert_eq!(raw_a.aqi_category, None);
    assert_eq!(raw_a.traffic_level, Some(3));

    // Bucketed under the sample's own local hour.
    let (date, hour) = local_date_hour(raw_a.timestamp, local_offset());
    let rows = pipeline.store.fetch_hourly_for_date(date).unwrap();
    let row_a = rows
        .iter()
        .find(|r| r.location == LOCATION_A && r.hour == hour)
        .unwrap();
    assert_eq!(row_a.avg_traffic_level, Some(3.0));
    assert_eq!(row_a.avg_aqi_value, None);
    assert_eq!(row_a.aqi_count, 0);
    assert_eq!(row_a.total_records, 1);
    assert_eq!(row_a.is_peak_hour, PEAK_HOURS.contains(&hour));

    pipeline.shutdown().await;
}

/// Scenario: duplicate delivery. Redelivering the same record leaves one
/// realtime row and a single hourly count.
#[tokio::test]
async fn test_duplicate_delivery_converges() {
    let pipeline = TestPipeline::spawn();
    let ts = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap();
    let s = sample(LOCATION_A, ts, Some(100), Some(3));

    publish(&pipeline, &s).await;
    publish(&pipeline, &s).await;
    pipeline.drain().await;

    let realtime = pipeline
        .store
        .fetch_recent_realtime(ts - chrono::Duration::hours(1))
        .unwrap();
    assert_eq!(
        realtime
            .iter()
            .filter(|r| r.location == LOCATION_A && r.timestamp == ts)
            .count(),
        1
    );

    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let rows = pipeline.store.fetch_hourly_for_date(date).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_records, 1);
    assert_eq!(rows[0].avg_aqi_value, Some(100.0));

    pipeline.shutdown().await;
}

/// Scenario: batch overwrite. The raw log holds samples that never reached
/// the bus; the hourly job replaces the speed layer's partial row with the
/// authoritative rebuild.
#[tokio::test]
async fn test_batch_overwrites_speed_values() {
    let pipeline = TestPipeline::spawn();
    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    // 10 samples reach the speed layer via the bus; the raw log gets 12.
    for i in 0..12u32 {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 6, i, 0).unwrap();
        let s = sample(LOCATION_A, ts, Some(94 + i), Some(2));
        if i < 10 {
            publish(&pipeline, &s).await;
        }
        pipeline.store.append_raw(&s).unwrap();
    }
    pipeline.drain().await;

    let before = pipeline.store.fetch_hourly_for_date(date).unwrap();
    assert_eq!(before[0].total_records, 10);

    let written = rebuild_hour(
        pipeline.store.as_ref(),
        local_offset(),
        PEAK_HOURS,
        date,
        13,
    )
    .unwrap();
    assert_eq!(written, 1);

    let after = pipeline.store.fetch_hourly_for_date(date).unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].total_records, 12);
    // Average of 94..=105 is 99.5.
    assert_eq!(after[0].avg_aqi_value, Some(99.5));

    // Re-running the job changes nothing (idempotence).
    rebuild_hour(
        pipeline.store.as_ref(),
        local_offset(),
        PEAK_HOURS,
        date,
        13,
    )
    .unwrap();
    let again = pipeline.store.fetch_hourly_for_date(date).unwrap();
    assert_eq!(again[0].avg_aqi_value, after[0].avg_aqi_value);
    assert_eq!(again[0].total_records, after[0].total_records);

    pipeline.shutdown().await;
}

/// Scenario: peak-hour summary names the worst (hour, location) pair for
/// each metric.
#[tokio::test]
async fn test_peak_hour_summary() {
    let pipeline = TestPipeline::spawn();
    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    let hourly = |hour: u32, location: &str, aqi: f64, traffic: f64| HourlyAggregation {
        date,
        hour,
        location: location.to_string(),
        avg_traffic_level: Some(traffic),
        traffic_count: 10,
        avg_aqi_value: Some(aqi),
        aqi_count: 10,
        total_records: 10,
        is_peak_hour: PEAK_HOURS.contains(&hour),
        updated_at: Utc::now(),
    };
    pipeline
        .store
        .overwrite_hourly(&hourly(17, LOCATION_A, 180.3, 3.1))
        .unwrap();
    pipeline
        .store
        .overwrite_hourly(&hourly(8, LOCATION_B, 95.0, 4.6))
        .unwrap();
    pipeline
        .store
        .overwrite_hourly(&hourly(12, LOCATION_B, 60.0, 2.0))
        .unwrap();

    let summary = analyze_peaks(pipeline.store.as_ref(), date)
        .unwrap()
        .unwrap();
    assert_eq!(summary.analysis_date, date);
    assert_eq!(summary.peak_aqi_hour, 17);
    assert_eq!(summary.peak_aqi_location, LOCATION_A);
    assert_eq!(summary.peak_aqi_value, 180.3);
    assert_eq!(summary.peak_traffic_hour, 8);
    assert_eq!(summary.peak_traffic_location, LOCATION_B);
    assert_eq!(summary.peak_traffic_value, 4.6);

    let via_serving = pipeline.serving.get_peak_summary(date).unwrap().unwrap();
    assert_eq!(via_serving.peak_aqi_hour, 17);
    assert!(pipeline
        .serving
        .get_peak_summary(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap())
        .unwrap()
        .is_none());

    pipeline.shutdown().await;
}

/// Scenario: fallback. With the speed layer silent the serving layer
/// answers from the batch tier; once fresh records flow again it switches
/// back within one cycle.
#[tokio::test]
async fn test_serving_fallback_and_recovery() {
    let pipeline = TestPipeline::spawn();
    let max_age = Duration::from_secs(3600);

    // Speed layer "offline for two hours": only hourly aggregations exist.
    let (date, hour) = local_date_hour(Utc::now() - chrono::Duration::hours(2), local_offset());
    pipeline
        .store
        .upsert_hourly_increment(date, hour, LOCATION_A, Some(3), Some(70), false, Utc::now())
        .unwrap();

    let view = pipeline.serving.get_unified_view(max_age).unwrap();
    assert_eq!(view.source, Some(SourceTier::Batch));
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].location, LOCATION_A);
    // Coordinates are enriched from the configured location set.
    assert_eq!(view.rows[0].latitude, Some(-6.21));

    // Speed layer comes back: one cycle's worth of fresh records.
    pipeline.feeds.set_steady_traffic(LOCATION_A, 2);
    pipeline.feeds.set_steady_aqi(LOCATION_A, 55);
    pipeline.feeds.set_steady_traffic(LOCATION_B, 4);
    pipeline.feeds.set_steady_aqi(LOCATION_B, 130);
    let stats = pipeline.poller.run_cycle().await;
    assert_eq!(stats.emitted, 2);
    pipeline.drain().await;

    let view = pipeline.serving.get_unified_view(max_age).unwrap();
    assert_eq!(view.source, Some(SourceTier::Speed));
    assert_eq!(view.rows.len(), 2);

    pipeline.shutdown().await;
}

/// The full speed path: a poller cycle lands in both the realtime set and
/// the hourly aggregation for every emitted sample.
#[tokio::test]
async fn test_cycle_to_hourly_invariant() {
    let pipeline = TestPipeline::spawn();
    pipeline.feeds.set_steady_traffic(LOCATION_A, 1);
    pipeline.feeds.set_steady_aqi(LOCATION_A, 20);
    pipeline.feeds.set_steady_traffic(LOCATION_B, 5);
    pipeline.feeds.set_steady_aqi(LOCATION_B, 310);

    pipeline.poller.run_cycle().await;
    pipeline.drain().await;

    let realtime = pipeline
        .store
        .fetch_recent_realtime(Utc::now() - chrono::Duration::hours(1))
        .unwrap();
    assert_eq!(realtime.len(), 2);

    // Every realtime sample has a matching hourly row with a count.
    for row in &realtime {
        let (date, hour) = local_date_hour(row.timestamp, local_offset());
        let hourly = pipeline.store.fetch_hourly_for_date(date).unwrap();
        let matching = hourly
            .iter()
            .find(|h| h.hour == hour && h.location == row.location)
            .unwrap();
        assert!(matching.total_records >= 1);
    }

    let hazardous = realtime.iter().find(|r| r.location == LOCATION_B).unwrap();
    assert_eq!(hazardous.aqi_category, Some(AqiCategory::Hazardous));

    pipeline.shutdown().await;
}

/// Malformed bus payloads are dropped without wedging the partition.
#[tokio::test]
async fn test_malformed_record_does_not_wedge_consumer() {
    let pipeline = TestPipeline::spawn();
    let ts = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap();

    pipeline
        .bus
        .publish(TOPIC, LOCATION_A, b"{not json")
        .await
        .unwrap();
    publish(&pipeline, &sample(LOCATION_A, ts, Some(42), Some(1))).await;
    pipeline.drain().await;

    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let rows = pipeline.store.fetch_hourly_for_date(date).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].avg_aqi_value, Some(42.0));

    pipeline.shutdown().await;
}
