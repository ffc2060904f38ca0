//! Daily rollup: one aggregation row per location over a whole local day.

use super::super::job::{BatchJob, JobContext, JobError, JobSchedule};
use super::{dedupe_by_identity, local_day_window};
use crate::model::local_date_hour;
use crate::store::{DailyAggregation, PipelineStore, StoreResult};
use chrono::{FixedOffset, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Default)]
struct DayAccumulator {
    aqi_sum: f64,
    aqi_count: i64,
    min_aqi: Option<i64>,
    max_aqi: Option<i64>,
    traffic_sum: f64,
    traffic_count: i64,
    min_traffic: Option<i64>,
    max_traffic: Option<i64>,
    total: i64,
}

impl DayAccumulator {
    fn add(&mut self, traffic_level: Option<u8>, aqi_value: Option<u32>) {
        if let Some(aqi) = aqi_value {
            let aqi = aqi as i64;
            self.aqi_sum += aqi as f64;
            self.aqi_count += 1;
            self.min_aqi = Some(self.min_aqi.map_or(aqi, |m| m.min(aqi)));
            self.max_aqi = Some(self.max_aqi.map_or(aqi, |m| m.max(aqi)));
        }
        if let Some(level) = traffic_level {
            let level = level as i64;
            self.traffic_sum += level as f64;
            self.traffic_count += 1;
            self.min_traffic = Some(self.min_traffic.map_or(level, |m| m.min(level)));
            self.max_traffic = Some(self.max_traffic.map_or(level, |m| m.max(level)));
        }
        self.total += 1;
    }
}

/// Rebuild the whole-day aggregation rows for one local date. Returns the
/// number of locations written.
pub fn rebuild_day(
    store: &dyn PipelineStore,
    local_offset: FixedOffset,
    date: NaiveDate,
) -> StoreResult<usize> {
    let (start, end) = local_day_window(date, local_offset);
    let records = dedupe_by_identity(store.fetch_raw_window(start, end)?);

    let mut by_location: BTreeMap<String, DayAccumulator> = BTreeMap::new();
    for record in records {
        by_location
            .entry(record.location)
            .or_default()
            .add(record.traffic_level, record.aqi_value);
    }

    let created_at = Utc::now();
    let written = by_location.len();
    for (location, acc) in by_location {
        store.write_daily(&DailyAggregation {
            date,
            location,
            hour: None,
            avg_aqi: (acc.aqi_count > 0).then(|| acc.aqi_sum / acc.aqi_count as f64),
            min_aqi: acc.min_aqi,
            max_aqi: acc.max_aqi,
            avg_traffic: (acc.traffic_count > 0)
                .then(|| acc.traffic_sum / acc.traffic_count as f64),
            min_traffic: acc.min_traffic,
            max_traffic: acc.max_traffic,
            data_points_count: acc.total,
            is_peak_hour: false,
            created_at,
        })?;
    }
    Ok(written)
}

/// Scheduled job aggregating the previous local day.
pub struct DailyRollupJob {
    hour: u32,
}

impl DailyRollupJob {
    pub fn new(hour: u32) -> Self {
        Self { hour }
    }
}

impl BatchJob for DailyRollupJob {
    fn id(&self) -> &'static str {
        "daily_rollup"
    }

    fn description(&self) -> &'static str {
        "Aggregate the previous day's raw log into one row per location"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::DailyAt {
            hour: self.hour,
            minute: 0,
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let yesterday = Utc::now() - chrono::Duration::days(1);
        let (date, _) = local_date_hour(yesterday, ctx.local_offset);
        let written = rebuild_day(ctx.store.as_ref(), ctx.local_offset, date)?;
        info!(date = %date, locations = written, "Daily rollup completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AqiCategory, LocationSample};
    use crate::store::SqliteStore;
    use chrono::{DateTime, TimeZone};
    use std::sync::Arc;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn append(
        store: &SqliteStore,
        location: &str,
        ts: DateTime<Utc>,
        aqi: Option<u32>,
        traffic: Option<u8>,
    ) {
        store
            .append_raw(&LocationSample {
                timestamp: ts,
                location: location.to_string(),
                latitude: -6.2,
                longitude: 106.8,
                aqi_value: aqi,
                traffic_level: traffic,
                aqi_category: aqi.map(AqiCategory::from_aqi),
                is_peak_hour: false,
            })
            .unwrap();
    }

    #[test]
    fn test_rebuild_day_min_avg_max_per_location() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        // Local day 2025-01-01 spans 2024-12-31T17:00Z .. 2025-01-01T17:00Z.
        let base = Utc.with_ymd_and_hms(2024, 12, 31, 17, 0, 0).unwrap();
        for (i, aqi) in [40u32, 80, 120].iter().enumerate() {
            append(
                &store,
                "A",
                base + chrono::Duration::hours(i as i64),
                Some(*aqi),
                Some((i + 1) as u8),
            );
        }
        append(&store, "B", base, Some(200), None);
        // Outside the window: must not count.
        append(
            &store,
            "A",
            Utc.with_ymd_and_hms(2025, 1, 1, 17, 0, 0).unwrap(),
            Some(999),
            Some(5),
        );

        let written = rebuild_day(store.as_ref(), offset(), date).unwrap();
        assert_eq!(written, 2);

        let rows = store.fetch_daily(date).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].location, "A");
        assert_eq!(rows[0].hour, None);
        assert_eq!(rows[0].avg_aqi, Some(80.0));
        assert_eq!((rows[0].min_aqi, rows[0].max_aqi), (Some(40), Some(120)));
        assert_eq!((rows[0].min_traffic, rows[0].max_traffic), (Some(1), Some(3)));
        assert_eq!(rows[0].data_points_count, 3);
        assert_eq!(rows[1].location, "B");
        assert_eq!(rows[1].avg_aqi, Some(200.0));
        assert_eq!(rows[1].avg_traffic, None);
        assert_eq!(rows[1].data_points_count, 1);
    }

    #[test]
    fn test_rebuild_day_idempotent() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        append(
            &store,
            "A",
            Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap(),
            Some(55),
            Some(2),
        );

        rebuild_day(store.as_ref(), offset(), date).unwrap();
        let first = store.fetch_daily(date).unwrap();
        rebuild_day(store.as_ref(), offset(), date).unwrap();
        let second = store.fetch_daily(date).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].avg_aqi, second[0].avg_aqi);
        assert_eq!(first[0].data_points_count, second[0].data_points_count);
    }
}
