//! Hourly rollup: rebuild hourly aggregations from the raw log.
//!
//! The batch-computed row replaces whatever the speed layer accumulated
//! for that (date, hour, location); the raw log is the source of truth.

use super::super::job::{BatchJob, JobContext, JobError, JobSchedule};
use super::{dedupe_by_identity, local_hour_window};
use crate::model::{is_peak_hour, local_date_hour};
use crate::store::{HourlyAggregation, PipelineStore, StoreResult};
use chrono::{FixedOffset, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Default)]
struct MetricAccumulator {
    traffic_sum: f64,
    traffic_count: i64,
    aqi_sum: f64,
    aqi_count: i64,
    total: i64,
}

impl MetricAccumulator {
    fn add(&mut self, traffic_level: Option<u8>, aqi_value: Option<u32>) {
        if let Some(level) = traffic_level {
            self.traffic_sum += level as f64;
            self.traffic_count += 1;
        }
        if let Some(aqi) = aqi_value {
            self.aqi_sum += aqi as f64;
            self.aqi_count += 1;
        }
        self.total += 1;
    }

    fn avg_traffic(&self) -> Option<f64> {
        (self.traffic_count > 0).then(|| self.traffic_sum / self.traffic_count as f64)
    }

    fn avg_aqi(&self) -> Option<f64> {
        (self.aqi_count > 0).then(|| self.aqi_sum / self.aqi_count as f64)
    }
}

/// Rebuild the hourly aggregation rows for one local (date, hour) window.
/// Returns the number of locations written.
pub fn rebuild_hour(
    store: &dyn PipelineStore,
    local_offset: FixedOffset,
    peak_hours: &[u32],
    date: NaiveDate,
    hour: u32,
) -> StoreResult<usize> {
    let (start, end) = local_hour_window(date, hour, local_offset);
    let records = dedupe_by_identity(store.fetch_raw_window(start, end)?);

    let mut by_location: BTreeMap<String, MetricAccumulator> = BTreeMap::new();
    for record in records {
        by_location
            .entry(record.location)
            .or_default()
            .add(record.traffic_level, record.aqi_value);
    }

    let updated_at = Utc::now();
    let written = by_location.len();
    for (location, acc) in by_location {
        store.overwrite_hourly(&HourlyAggregation {
            date,
            hour,
            location,
            avg_traffic_level: acc.avg_traffic(),
            traffic_count: acc.traffic_count,
            avg_aqi_value: acc.avg_aqi(),
            aqi_count: acc.aqi_count,
            total_records: acc.total,
            is_peak_hour: is_peak_hour(hour, peak_hours),
            updated_at,
        })?;
    }
    Ok(written)
}

/// Scheduled job rebuilding the previous completed local hour.
pub struct HourlyRollupJob {
    minute: u32,
}

impl HourlyRollupJob {
    pub fn new(minute: u32) -> Self {
        Self { minute }
    }
}

impl BatchJob for HourlyRollupJob {
    fn id(&self) -> &'static str {
        "hourly_rollup"
    }

    fn description(&self) -> &'static str {
        "Rebuild hourly aggregations for the previous hour from the raw log"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::HourlyAt {
            minute: self.minute,
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let previous_hour = Utc::now() - chrono::Duration::hours(1);
        let (date, hour) = local_date_hour(previous_hour, ctx.local_offset);
        let written = rebuild_hour(
            ctx.store.as_ref(),
            ctx.local_offset,
            &ctx.peak_hours,
            date,
            hour,
        )?;
        info!(
            date = %date,
            hour,
            locations = written,
            "Hourly rollup completed"
        );
        Ok(())
    }
}
