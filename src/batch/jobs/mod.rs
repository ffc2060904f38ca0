//! The three batch jobs: hourly rollup, daily rollup, peak-hour analysis.

mod daily_rollup;
mod hourly_rollup;
mod peak_hours;

pub use daily_rollup::{rebuild_day, DailyRollupJob};
pub use hourly_rollup::{rebuild_hour, HourlyRollupJob};
pub use peak_hours::{analyze_peaks, PeakHourAnalysisJob};

use super::local_to_utc;
use crate::store::RawRecord;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// UTC instants covering the local hour [date hour:00, date hour+1:00).
pub(crate) fn local_hour_window(
    date: NaiveDate,
    hour: u32,
    offset: FixedOffset,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_to_utc(
        date.and_hms_opt(hour, 0, 0).expect("hour in 0..24"),
        offset,
    );
    (start, start + chrono::Duration::hours(1))
}

/// UTC instants covering the whole local day.
pub(crate) fn local_day_window(
    date: NaiveDate,
    offset: FixedOffset,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_to_utc(date.and_hms_opt(0, 0, 0).expect("midnight"), offset);
    (start, start + chrono::Duration::days(1))
}

/// Drop raw rows that repeat a (location, timestamp) already seen.
///
/// The raw log permits duplicate appends; aggregation counts each identity
/// once. Input must be ordered by (location, timestamp), which is how the
/// store returns windows.
pub(crate) fn dedupe_by_identity(records: Vec<RawRecord>) -> Vec<RawRecord> {
    let mut deduped: Vec<RawRecord> = Vec::with_capacity(records.len());
    for record in records {
        if let Some(last) = deduped.last() {
            if last.location == record.location && last.timestamp == record.timestamp {
                continue;
            }
        }
        deduped.push(record);
    }
    deduped
}
