//! Row types for the six pipeline tables plus batch job bookkeeping.

use crate::model::{AqiCategory, LocationSample};
use chrono::{DateTime, NaiveDate, Utc};

/// One row of the append-only raw log.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub aqi_value: Option<u32>,
    pub aqi_category: Option<AqiCategory>,
    pub traffic_level: Option<u8>,
    pub is_peak_hour: bool,
}

impl RawRecord {
    pub fn sample(&self) -> LocationSample {
        LocationSample {
            timestamp: self.timestamp,
            location: self.location.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            aqi_value: self.aqi_value,
            traffic_level: self.traffic_level,
            aqi_category: self.aqi_category,
            is_peak_hour: self.is_peak_hour,
        }
    }
}

/// One row of the realtime active set, keyed (location, timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeRow {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub aqi_value: Option<u32>,
    pub aqi_category: Option<AqiCategory>,
    pub traffic_level: Option<u8>,
    pub is_peak_hour: bool,
    pub processing_timestamp: DateTime<Utc>,
    pub is_active: bool,
}

/// Whether a realtime upsert created a new row or replaced an existing one.
///
/// The speed layer uses this to guard the hourly counters against
/// double-increment on redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Incrementally maintained hourly aggregation, keyed (date, hour, location).
///
/// Averages carry their own sample counts per metric so that a sample
/// missing one metric never dilutes the other's average.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyAggregation {
    pub date: NaiveDate,
    pub hour: u32,
    pub location: String,
    pub avg_traffic_level: Option<f64>,
    pub traffic_count: i64,
    pub avg_aqi_value: Option<f64>,
    pub aqi_count: i64,
    pub total_records: i64,
    pub is_peak_hour: bool,
    pub updated_at: DateTime<Utc>,
}

/// Batch-produced aggregation keyed (date, location, hour), where a NULL
/// hour denotes the whole-day row.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregation {
    pub date: NaiveDate,
    pub location: String,
    pub hour: Option<u32>,
    pub avg_aqi: Option<f64>,
    pub min_aqi: Option<i64>,
    pub max_aqi: Option<i64>,
    pub avg_traffic: Option<f64>,
    pub min_traffic: Option<i64>,
    pub max_traffic: Option<i64>,
    pub data_points_count: i64,
    pub is_peak_hour: bool,
    pub created_at: DateTime<Utc>,
}

/// One row per analysis date naming the worst hour/location for each metric.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakHourSummary {
    pub analysis_date: NaiveDate,
    pub peak_aqi_hour: u32,
    pub peak_aqi_value: f64,
    pub peak_aqi_location: String,
    pub peak_traffic_hour: u32,
    pub peak_traffic_value: f64,
    pub peak_traffic_location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

/// Audit record for one batch job execution.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_run_status_round_trip() {
        for status in [
            JobRunStatus::Running,
            JobRunStatus::Completed,
            JobRunStatus::Failed,
        ] {
            assert_eq!(JobRunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobRunStatus::parse("bogus"), None);
    }
}
