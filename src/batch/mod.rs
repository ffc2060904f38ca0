//! Batch layer: scheduled aggregation jobs over the raw log.
//!
//! A single serial scheduler triggers the hourly rollup, the daily rollup
//! and the peak-hour analysis at their local-time schedules. Every job is
//! idempotent over its window, and batch output is authoritative over
//! whatever the speed layer accumulated incrementally.

mod job;
pub mod jobs;
mod scheduler;

pub use job::{BatchJob, JobContext, JobError, JobSchedule};
pub use scheduler::BatchScheduler;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

/// Convert a local wall-clock time to the UTC instant it names. Fixed
/// offsets have no gaps or folds, so the mapping is total.
pub(crate) fn local_to_utc(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    use chrono::TimeZone;
    offset
        .from_local_datetime(&naive)
        .single()
        .expect("fixed offsets map local times unambiguously")
        .with_timezone(&Utc)
}
