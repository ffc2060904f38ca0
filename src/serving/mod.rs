//! Serving layer: read-only façade over the store.
//!
//! External readers get one entry point, `get_unified_view`, which answers
//! from the freshest tier that has data: the realtime set, then the latest
//! hourly aggregation per location, then the raw log. The tier that
//! supplied the rows is part of the answer, because the dashboard shows its
//! data source. Store errors always propagate; an unavailable store is
//! never reported as "no data".

use crate::batch::local_to_utc;
use crate::config::AppConfig;
use crate::model::AqiCategory;
use crate::ops::metrics;
use crate::store::{HourlyAggregation, PeakHourSummary, PipelineStore, StoreResult};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Which tier supplied the rows of a unified view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Speed,
    Batch,
    Raw,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Speed => "speed",
            SourceTier::Batch => "batch",
            SourceTier::Raw => "raw",
        }
    }
}

/// One row of the unified view, shaped like a current observation
/// regardless of which tier produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedRow {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub aqi_value: Option<u32>,
    pub aqi_category: Option<AqiCategory>,
    pub traffic_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedView {
    pub rows: Vec<UnifiedRow>,
    /// None only when every tier is empty.
    pub source: Option<SourceTier>,
}

pub struct ServingLayer {
    store: Arc<dyn PipelineStore>,
    /// Static coordinates for aggregation-backed rows, which carry none.
    coordinates: HashMap<String, (f64, f64)>,
    local_offset: FixedOffset,
}

impl ServingLayer {
    pub fn new(store: Arc<dyn PipelineStore>, config: &AppConfig) -> Self {
        Self {
            store,
            coordinates: config.location_coordinates(),
            local_offset: config.local_offset,
        }
    }

    /// The tiered read. Tier order is fixed: speed, then batch, then raw.
    pub fn get_unified_view(&self, max_realtime_age: Duration) -> StoreResult<UnifiedView> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_realtime_age)
                .unwrap_or_else(|_| chrono::Duration::hours(1));

        let realtime = self.store.fetch_recent_realtime(cutoff)?;
        if !realtime.is_empty() {
            metrics::record_serving_query(SourceTier::Speed.as_str());
            let rows = realtime
                .into_iter()
                .map(|row| UnifiedRow {
                    timestamp: row.timestamp,
                    location: row.location,
                    latitude: Some(row.latitude),
                    longitude: Some(row.longitude),
                    aqi_value: row.aqi_value,
                    aqi_category: row.aqi_category,
                    traffic_level: row.traffic_level,
                })
                .collect();
            return Ok(UnifiedView {
                rows,
                source: Some(SourceTier::Speed),
            });
        }

        let hourly = self.store.fetch_latest_hourly_per_location()?;
        if !hourly.is_empty() {
            metrics::record_serving_query(SourceTier::Batch.as_str());
            let rows = hourly
                .into_iter()
                .map(|row| self.hourly_to_row(row))
                .collect();
            return Ok(UnifiedView {
                rows,
                source: Some(SourceTier::Batch),
            });
        }

        let raw = self.store.fetch_latest_raw_per_location()?;
        if !raw.is_empty() {
            metrics::record_serving_query(SourceTier::Raw.as_str());
            let rows = raw
                .into_iter()
                .map(|record| UnifiedRow {
                    timestamp: record.timestamp,
                    location: record.location,
                    latitude: Some(record.latitude),
                    longitude: Some(record.longitude),
                    aqi_value: record.aqi_value,
                    aqi_category: record.aqi_category,
                    traffic_level: record.traffic_level,
                })
                .collect();
            return Ok(UnifiedView {
                rows,
                source: Some(SourceTier::Raw),
            });
        }

        Ok(UnifiedView {
            rows: Vec::new(),
            source: None,
        })
    }

    /// Hourly aggregations for the last `days` local days, ordered by
    /// (location, date, hour).
    pub fn get_hourly_series(&self, days: u32) -> StoreResult<Vec<HourlyAggregation>> {
        let today = Utc::now().with_timezone(&self.local_offset).date_naive();
        let since = today - chrono::Duration::days(days as i64);
        self.store.fetch_hourly(since)
    }

    pub fn get_peak_summary(&self, date: NaiveDate) -> StoreResult<Option<PeakHourSummary>> {
        self.store.fetch_peak_summary(date)
    }

    fn hourly_to_row(&self, row: HourlyAggregation) -> UnifiedRow {
        // An hourly row represents the top of its local hour.
        let timestamp = local_to_utc(
            row.date
                .and_hms_opt(row.hour, 0, 0)
                .expect("hour in 0..24"),
            self.local_offset,
        );
        let coords = self.coordinates.get(&row.location).copied();
        let aqi_value = row.avg_aqi_value.map(|avg| avg.round().max(0.0) as u32);
        UnifiedRow {
            timestamp,
            location: row.location,
            latitude: coords.map(|(lat, _)| lat),
            longitude: coords.map(|(_, lon)| lon),
            aqi_value,
            aqi_category: aqi_value.map(AqiCategory::from_aqi),
            traffic_level: row
                .avg_traffic_level
                .map(|avg| avg.round().clamp(1.0, 5.0) as u8),
        }
    }
}
