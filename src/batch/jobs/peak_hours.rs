//! Peak-hour analysis: the worst hour/location pair per metric per day.

use super::super::job::{BatchJob, JobContext, JobError, JobSchedule};
use crate::model::local_date_hour;
use crate::store::{PeakHourSummary, PipelineStore, StoreResult};
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

/// Select the (hour, location) with the highest average AQI and the one
/// with the highest average traffic from the day's hourly aggregations and
/// upsert the summary row. Returns the written summary, or None when the
/// day has no usable hourly data.
///
/// Ties break deterministically: the earlier hour wins, then the location
/// that sorts first.
pub fn analyze_peaks(
    store: &dyn PipelineStore,
    date: NaiveDate,
) -> StoreResult<Option<PeakHourSummary>> {
    let hourly = store.fetch_hourly_for_date(date)?;

    let mut best_aqi: Option<(u32, &str, f64)> = None;
    let mut best_traffic: Option<(u32, &str, f64)> = None;
    for row in &hourly {
        if let Some(avg) = row.avg_aqi_value {
            if best_aqi.map_or(true, |(_, _, best)| avg > best) {
                best_aqi = Some((row.hour, row.location.as_str(), avg));
            }
        }
        if let Some(avg) = row.avg_traffic_level {
            if best_traffic.map_or(true, |(_, _, best)| avg > best) {
                best_traffic = Some((row.hour, row.location.as_str(), avg));
            }
        }
    }

    let (Some(aqi), Some(traffic)) = (best_aqi, best_traffic) else {
        return Ok(None);
    };

    let summary = PeakHourSummary {
        analysis_date: date,
        peak_aqi_hour: aqi.0,
        peak_aqi_value: aqi.2,
        peak_aqi_location: aqi.1.to_string(),
        peak_traffic_hour: traffic.0,
        peak_traffic_value: traffic.2,
        peak_traffic_location: traffic.1.to_string(),
        created_at: Utc::now(),
    };
    store.write_peak(&summary)?;
    Ok(Some(summary))
}

/// Scheduled job analyzing the previous local day, after the daily rollup.
pub struct PeakHourAnalysisJob {
    hour: u32,
}

impl PeakHourAnalysisJob {
    pub fn new(hour: u32) -> Self {
        Self { hour }
    }
}

impl BatchJob for PeakHourAnalysisJob {
    fn id(&self) -> &'static str {
        "peak_hour_analysis"
    }

    fn description(&self) -> &'static str {
        "Find the worst hour and location per metric for the previous day"
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
        match analyze_peaks(ctx.store.as_ref(), date)? {
            Some(summary) => {
                info!(
                    date = %date,
                    aqi_hour = summary.peak_aqi_hour,
                    aqi_location = %summary.peak_aqi_location,
                    traffic_hour = summary.peak_traffic_hour,
                    traffic_location = %summary.peak_traffic_location,
                    "Peak hour analysis completed"
                );
            }
            None => {
                warn!(date = %date, "No hourly data available for peak hour analysis");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HourlyAggregation, SqliteStore};
    use std::sync::Arc;

    fn hourly(
        date: NaiveDate,
        hour: u32,
        location: &str,
        aqi: Option<f64>,
        traffic: Option<f64>,
    ) -> HourlyAggregation {
        HourlyAggregation {
            date,
            hour,
            location: location.to_string(),
            avg_traffic_level: traffic,
            traffic_count: traffic.map_or(0, |_| 4),
            avg_aqi_value: aqi,
            aqi_count: aqi.map_or(0, |_| 4),
            total_records: 4,
            is_peak_hour: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_peaks_selected_per_metric() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        for row in [
            hourly(date, 8, "Thamrin", Some(90.0), Some(4.6)),
            hourly(date, 17, "Sudirman", Some(180.3), Some(3.2)),
            hourly(date, 12, "Thamrin", Some(70.0), Some(2.0)),
        ] {
            store.overwrite_hourly(&row).unwrap();
        }

        let summary = analyze_peaks(store.as_ref(), date).unwrap().unwrap();
        assert_eq!(summary.peak_aqi_hour, 17);
        assert_eq!(summary.peak_aqi_location, "Sudirman");
        assert_eq!(summary.peak_aqi_value, 180.3);
        assert_eq!(summary.peak_traffic_hour, 8);
        assert_eq!(summary.peak_traffic_location, "Thamrin");
        assert_eq!(summary.peak_traffic_value, 4.6);

        let fetched = store.fetch_peak_summary(date).unwrap().unwrap();
        assert_eq!(fetched.peak_aqi_hour, 17);
    }

    #[test]
    fn test_ties_break_toward_earlier_hour() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        store
            .overwrite_hourly(&hourly(date, 7, "A", Some(150.0), Some(4.0)))
            .unwrap();
        store
            .overwrite_hourly(&hourly(date, 18, "B", Some(150.0), Some(4.0)))
            .unwrap();

        let summary = analyze_peaks(store.as_ref(), date).unwrap().unwrap();
        assert_eq!(summary.peak_aqi_hour, 7);
        assert_eq!(summary.peak_traffic_hour, 7);
    }

    #[test]
    fn test_empty_day_writes_nothing() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(analyze_peaks(store.as_ref(), date).unwrap().is_none());
        assert!(store.fetch_peak_summary(date).unwrap().is_none());
    }

    #[test]
    fn test_rerun_overwrites_same_date() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        store
            .overwrite_hourly(&hourly(date, 9, "A", Some(100.0), Some(3.0)))
            .unwrap();
        analyze_peaks(store.as_ref(), date).unwrap().unwrap();

        // A later batch pass sees revised hourly data for the same date.
        store
            .overwrite_hourly(&hourly(date, 11, "A", Some(160.0), Some(2.0)))
            .unwrap();
        let summary = analyze_peaks(store.as_ref(), date).unwrap().unwrap();
        assert_eq!(summary.peak_aqi_hour, 11);

        let fetched = store.fetch_peak_summary(date).unwrap().unwrap();
        assert_eq!(fetched.peak_aqi_hour, 11);
    }
}
