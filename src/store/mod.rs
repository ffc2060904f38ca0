//! Relational persistence for the pipeline.
//!
//! `PipelineStore` is the single seam every layer writes and reads through:
//! the poller appends to the raw log, the speed layer maintains the realtime
//! set and incremental hourly rows, the batch layer overwrites aggregations
//! authoritatively, and the serving layer only reads. The store is the only
//! shared mutable state in the process.

mod models;
mod schema;
mod sqlite_store;

pub use models::{
    DailyAggregation, HourlyAggregation, JobRun, JobRunStatus, PeakHourSummary, RawRecord,
    RealtimeRow, UpsertOutcome,
};
pub use schema::PIPELINE_VERSIONED_SCHEMAS;
pub use sqlite_store::SqliteStore;

use crate::model::LocationSample;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is temporarily unreachable (locked / busy). Callers retry
    /// with backoff; consumers withhold acknowledgement.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row violates the data contract and can never be persisted.
    #[error("data contract violation: {0}")]
    Contract(String),

    #[error("store error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    StoreError::Unavailable(e.to_string())
                }
                _ => StoreError::Internal(e.to_string()),
            },
            _ => StoreError::Internal(e.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Narrow per-table operations over the pipeline database.
///
/// Write paths belong exclusively to the pipeline; the serving layer uses
/// the fetch operations only.
pub trait PipelineStore: Send + Sync {
    // Raw log
    fn append_raw(&self, sample: &LocationSample) -> StoreResult<()>;
    fn fetch_raw_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<RawRecord>>;
    fn fetch_latest_raw_per_location(&self) -> StoreResult<Vec<RawRecord>>;

    // Realtime set
    /// Insert keyed (location, timestamp); replace on conflict. Reports
    /// whether a new row was created so callers can avoid double-counting.
    fn upsert_realtime(
        &self,
        sample: &LocationSample,
        processing_timestamp: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome>;
    /// Deactivate rows older than the cutoff; returns how many were flipped.
    fn evict_stale_realtime(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
    /// Physically delete inactive rows older than the cutoff.
    fn purge_inactive_realtime(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
    fn fetch_recent_realtime(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<RealtimeRow>>;

    // Hourly aggregations
    /// Atomic single-sample incremental update with per-metric running
    /// averages. An absent metric leaves its average and count untouched.
    #[allow(clippy::too_many_arguments)]
    fn upsert_hourly_increment(
        &self,
        date: NaiveDate,
        hour: u32,
        location: &str,
        traffic_level: Option<u8>,
        aqi_value: Option<u32>,
        is_peak_hour: bool,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// Replace every value of the row with batch-recomputed ones.
    fn overwrite_hourly(&self, row: &HourlyAggregation) -> StoreResult<()>;
    fn fetch_hourly(&self, since: NaiveDate) -> StoreResult<Vec<HourlyAggregation>>;
    fn fetch_hourly_for_date(&self, date: NaiveDate) -> StoreResult<Vec<HourlyAggregation>>;
    fn fetch_latest_hourly_per_location(&self) -> StoreResult<Vec<HourlyAggregation>>;

    // Batch outputs
    fn write_daily(&self, row: &DailyAggregation) -> StoreResult<()>;
    fn fetch_daily(&self, date: NaiveDate) -> StoreResult<Vec<DailyAggregation>>;
    fn write_peak(&self, row: &PeakHourSummary) -> StoreResult<()>;
    fn fetch_peak_summary(&self, date: NaiveDate) -> StoreResult<Option<PeakHourSummary>>;

    // Batch job bookkeeping
    fn record_job_start(&self, job_id: &str) -> StoreResult<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> StoreResult<()>;
    fn get_last_job_run(&self, job_id: &str) -> StoreResult<Option<JobRun>>;

    /// Cheap connectivity probe for the readiness endpoint.
    fn ping(&self) -> StoreResult<()>;
}
