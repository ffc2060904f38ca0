//! SQLite-backed implementation of `PipelineStore`.
//!
//! One connection behind a mutex keeps every write serializable, which is
//! what makes the hourly upsert race-free without further coordination.

use super::models::{
    DailyAggregation, HourlyAggregation, JobRun, JobRunStatus, PeakHourSummary, RawRecord,
    RealtimeRow, UpsertOutcome,
};
use super::schema::PIPELINE_VERSIONED_SCHEMAS;
use super::{PipelineStore, StoreError, StoreResult};
use crate::model::{AqiCategory, LocationSample};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// Stable fixed-width RFC 3339 in UTC so text comparison orders correctly.
fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn parse_category(s: Option<String>) -> Option<AqiCategory> {
    s.as_deref().and_then(AqiCategory::parse)
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path).context("Failed to open pipeline database")?;
        Self::initialize(conn, || format!("{:?}", path))
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, || "<memory>".to_string())
    }

    fn initialize(conn: Connection, describe: impl Fn() -> String) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .context("Failed to set pragmas")?;

        let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        let current = PIPELINE_VERSIONED_SCHEMAS
            .last()
            .expect("at least one schema version")
            .version as i64;

        if raw_version == 0 {
            info!("Creating new pipeline database at {}", describe());
            for schema in PIPELINE_VERSIONED_SCHEMAS {
                schema.create(&conn)?;
            }
        } else {
            if raw_version < current {
                info!(
                    "Migrating pipeline database from version {} to {}",
                    raw_version, current
                );
                for schema in PIPELINE_VERSIONED_SCHEMAS {
                    if schema.version as i64 > raw_version {
                        if let Some(migration) = schema.migration {
                            migration(&conn)?;
                        }
                        conn.execute(
                            &format!("PRAGMA user_version = {}", schema.version),
                            [],
                        )?;
                    }
                }
            } else if raw_version > current {
                anyhow::bail!(
                    "Pipeline database version {} is newer than this binary supports ({})",
                    raw_version,
                    current
                );
            }
            PIPELINE_VERSIONED_SCHEMAS
                .last()
                .expect("at least one schema version")
                .validate(&conn)
                .context("Pipeline database schema validation failed")?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Internal(format!("connection mutex poisoned: {}", e)))
    }

    fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
        let ts: String = row.get("timestamp")?;
        Ok(RawRecord {
            id: row.get("id")?,
            timestamp: parse_ts(&ts)?,
            location: row.get("location")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            aqi_value: row.get::<_, Option<i64>>("aqi_value")?.map(|v| v as u32),
            aqi_category: parse_category(row.get("aqi_category")?),
            traffic_level: row
                .get::<_, Option<i64>>("traffic_level")?
                .map(|v| v as u8),
            is_peak_hour: row.get::<_, i64>("is_peak_hour")? != 0,
        })
    }

    fn row_to_realtime(row: &rusqlite::Row) -> rusqlite::Result<RealtimeRow> {
        let ts: String = row.get("timestamp")?;
        let processing_ts: String = row.get("processing_timestamp")?;
        Ok(RealtimeRow {
            timestamp: parse_ts(&ts)?,
            location: row.get("location")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            aqi_value: row.get::<_, Option<i64>>("aqi_value")?.map(|v| v as u32),
            aqi_category: parse_category(row.get("aqi_category")?),
            traffic_level: row
                .get::<_, Option<i64>>("traffic_level")?
                .map(|v| v as u8),
            is_peak_hour: row.get::<_, i64>("is_peak_hour")? != 0,
            processing_timestamp: parse_ts(&processing_ts)?,
            is_active: row.get::<_, i64>("is_active")? != 0,
        })
    }

    fn row_to_hourly(row: &rusqlite::Row) -> rusqlite::Result<HourlyAggregation> {
        let date: String = row.get("date")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(HourlyAggregation {
            date: parse_date(&date)?,
            hour: row.get::<_, i64>("hour")? as u32,
            location: row.get("location")?,
            avg_traffic_level: row.get("avg_traffic_level")?,
            traffic_count: row.get("traffic_count")?,
            avg_aqi_value: row.get("avg_aqi_value")?,
            aqi_count: row.get("aqi_count")?,
            total_records: row.get("total_records")?,
            is_peak_hour: row.get::<_, i64>("is_peak_hour")? != 0,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn row_to_peak(row: &rusqlite::Row) -> rusqlite::Result<PeakHourSummary> {
        let date: String = row.get("analysis_date")?;
        let created_at: String = row.get("created_at")?;
        Ok(PeakHourSummary {
            analysis_date: parse_date(&date)?,
            peak_aqi_hour: row.get::<_, i64>("peak_aqi_hour")? as u32,
            peak_aqi_value: row.get("peak_aqi_value")?,
            peak_aqi_location: row.get("peak_aqi_location")?,
            peak_traffic_hour: row.get::<_, i64>("peak_traffic_hour")? as u32,
            peak_traffic_value: row.get("peak_traffic_value")?,
            peak_traffic_location: row.get("peak_traffic_location")?,
            created_at: parse_ts(&created_at)?,
        })
    }
}

impl PipelineStore for SqliteStore {
    fn append_raw(&self, sample: &LocationSample) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO raw_data
             (timestamp, location, latitude, longitude, aqi_value, aqi_category, traffic_level, is_peak_hour)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                format_ts(&sample.timestamp),
                sample.location,
                sample.latitude,
                sample.longitude,
                sample.aqi_value,
                sample.aqi_category.map(|c| c.as_str()),
                sample.traffic_level,
                sample.is_peak_hour,
            ],
        )?;
        Ok(())
    }

    fn fetch_raw_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<RawRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, location, latitude, longitude, aqi_value, aqi_category,
                    traffic_level, is_peak_hour
             FROM raw_data
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY location, timestamp, id",
        )?;
        let rows = stmt
            .query_map(params![format_ts(&start), format_ts(&end)], Self::row_to_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn fetch_latest_raw_per_location(&self) -> StoreResult<Vec<RawRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, location, latitude, longitude, aqi_value, aqi_category,
                    traffic_level, is_peak_hour
             FROM raw_data r
             WHERE r.id = (
                 SELECT r2.id FROM raw_data r2
                 WHERE r2.location = r.location
                 ORDER BY r2.timestamp DESC, r2.id DESC
                 LIMIT 1
             )
             ORDER BY location",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn upsert_realtime(
        &self,
        sample: &LocationSample,
        processing_timestamp: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO realtime_data
             (timestamp, location, latitude, longitude, aqi_value, aqi_category, traffic_level,
              is_peak_hour, processing_timestamp, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
            params![
                format_ts(&sample.timestamp),
                sample.location,
                sample.latitude,
                sample.longitude,
                sample.aqi_value,
                sample.aqi_category.map(|c| c.as_str()),
                sample.traffic_level,
                sample.is_peak_hour,
                format_ts(&processing_timestamp),
            ],
        )?;
        if inserted > 0 {
            return Ok(UpsertOutcome::Inserted);
        }
        conn.execute(
            "UPDATE realtime_data SET
                 latitude = ?1, longitude = ?2, aqi_value = ?3, aqi_category = ?4,
                 traffic_level = ?5, is_peak_hour = ?6, processing_timestamp = ?7, is_active = 1
             WHERE location = ?8 AND timestamp = ?9",
            params![
                sample.latitude,
                sample.longitude,
                sample.aqi_value,
                sample.aqi_category.map(|c| c.as_str()),
                sample.traffic_level,
                sample.is_peak_hour,
                format_ts(&processing_timestamp),
                sample.location,
                format_ts(&sample.timestamp),
            ],
        )?;
        Ok(UpsertOutcome::Replaced)
    }

    fn evict_stale_realtime(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE realtime_data SET is_active = 0
             WHERE timestamp < ?1 AND is_active = 1",
            params![format_ts(&cutoff)],
        )?;
        Ok(count)
    }

    fn purge_inactive_realtime(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count = conn.execute(
            "DELETE FROM realtime_data WHERE is_active = 0 AND timestamp < ?1",
            params![format_ts(&cutoff)],
        )?;
        Ok(count)
    }

    fn fetch_recent_realtime(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<RealtimeRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, location, latitude, longitude, aqi_value, aqi_category,
                    traffic_level, is_peak_hour, processing_timestamp, is_active
             FROM realtime_data
             WHERE timestamp >= ?1 AND is_active = 1
             ORDER BY timestamp DESC",
        )?;
        let rows = stmt
            .query_map(params![format_ts(&cutoff)], Self::row_to_realtime)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn upsert_hourly_increment(
        &self,
        date: NaiveDate,
        hour: u32,
        location: &str,
        traffic_level: Option<u8>,
        aqi_value: Option<u32>,
        is_peak_hour: bool,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        // Running average per metric: avg' = (avg * n + x) / (n + 1), where
        // n is that metric's own count. A NULL metric changes nothing on its
        // side of the row.
        conn.execute(
            "INSERT INTO hourly_aggregations
             (date, hour, location, avg_traffic_level, traffic_count, avg_aqi_value, aqi_count,
              total_records, is_peak_hour, updated_at)
             VALUES (?1, ?2, ?3, ?4, CASE WHEN ?4 IS NULL THEN 0 ELSE 1 END,
                     ?5, CASE WHEN ?5 IS NULL THEN 0 ELSE 1 END, 1, ?6, ?7)
             ON CONFLICT(date, hour, location) DO UPDATE SET
                 avg_traffic_level = CASE
                     WHEN excluded.avg_traffic_level IS NULL
                         THEN hourly_aggregations.avg_traffic_level
                     WHEN hourly_aggregations.avg_traffic_level IS NULL
                         THEN excluded.avg_traffic_level
                     ELSE (hourly_aggregations.avg_traffic_level * hourly_aggregations.traffic_count
                           + excluded.avg_traffic_level)
                          / (hourly_aggregations.traffic_count + 1)
                 END,
                 traffic_count = hourly_aggregations.traffic_count
                     + (excluded.avg_traffic_level IS NOT NULL),
                 avg_aqi_value = CASE
                     WHEN excluded.avg_aqi_value IS NULL
                         THEN hourly_aggregations.avg_aqi_value
                     WHEN hourly_aggregations.avg_aqi_value IS NULL
                         THEN excluded.avg_aqi_value
                     ELSE (hourly_aggregations.avg_aqi_value * hourly_aggregations.aqi_count
                           + excluded.avg_aqi_value)
                          / (hourly_aggregations.aqi_count + 1)
                 END,
                 aqi_count = hourly_aggregations.aqi_count
                     + (excluded.avg_aqi_value IS NOT NULL),
                 total_records = hourly_aggregations.total_records + 1,
                 is_peak_hour = excluded.is_peak_hour,
                 updated_at = excluded.updated_at",
            params![
                format_date(date),
                hour,
                location,
                traffic_level.map(|v| v as f64),
                aqi_value.map(|v| v as f64),
                is_peak_hour,
                format_ts(&updated_at),
            ],
        )?;
        Ok(())
    }

    fn overwrite_hourly(&self, row: &HourlyAggregation) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO hourly_aggregations
             (date, hour, location, avg_traffic_level, traffic_count, avg_aqi_value, aqi_count,
              total_records, is_peak_hour, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(date, hour, location) DO UPDATE SET
                 avg_traffic_level = excluded.avg_traffic_level,
                 traffic_count = excluded.traffic_count,
                 avg_aqi_value = excluded.avg_aqi_value,
                 aqi_count = excluded.aqi_count,
                 total_records = excluded.total_records,
                 is_peak_hour = excluded.is_peak_hour,
                 updated_at = excluded.updated_at",
            params![
                format_date(row.date),
                row.hour,
                row.location,
                row.avg_traffic_level,
                row.traffic_count,
                row.avg_aqi_value,
                row.aqi_count,
                row.total_records,
                row.is_peak_hour,
                format_ts(&row.updated_at),
            ],
        )?;
        Ok(())
    }

    fn fetch_hourly(&self, since: NaiveDate) -> StoreResult<Vec<HourlyAggregation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT date, hour, location, avg_traffic_level, traffic_count, avg_aqi_value,
                    aqi_count, total_records, is_peak_hour, updated_at
             FROM hourly_aggregations
             WHERE date >= ?1
             ORDER BY location, date, hour",
        )?;
        let rows = stmt
            .query_map(params![format_date(since)], Self::row_to_hourly)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn fetch_hourly_for_date(&self, date: NaiveDate) -> StoreResult<Vec<HourlyAggregation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT date, hour, location, avg_traffic_level, traffic_count, avg_aqi_value,
                    aqi_count, total_records, is_peak_hour, updated_at
             FROM hourly_aggregations
             WHERE date = ?1
             ORDER BY hour, location",
        )?;
        let rows = stmt
            .query_map(params![format_date(date)], Self::row_to_hourly)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn fetch_latest_hourly_per_location(&self) -> StoreResult<Vec<HourlyAggregation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT date, hour, location, avg_traffic_level, traffic_count, avg_aqi_value,
                    aqi_count, total_records, is_peak_hour, updated_at
             FROM hourly_aggregations h
             WHERE NOT EXISTS (
                 SELECT 1 FROM hourly_aggregations h2
                 WHERE h2.location = h.location
                   AND (h2.date > h.date OR (h2.date = h.date AND h2.hour > h.hour))
             )
             ORDER BY location",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_hourly)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn write_daily(&self, row: &DailyAggregation) -> StoreResult<()> {
        let conn = self.lock()?;
        // SQLite treats NULLs as distinct in unique constraints, so the
        // nullable hour key cannot rely on ON CONFLICT. Update-then-insert
        // under the connection lock is equivalent.
        let updated = conn.execute(
            "UPDATE daily_aggregations SET
                 avg_aqi = ?1, min_aqi = ?2, max_aqi = ?3,
                 avg_traffic = ?4, min_traffic = ?5, max_traffic = ?6,
                 data_points_count = ?7, is_peak_hour = ?8, created_at = ?9
             WHERE date = ?10 AND location = ?11
               AND ((hour IS NULL AND ?12 IS NULL) OR hour = ?12)",
            params![
                row.avg_aqi,
                row.min_aqi,
                row.max_aqi,
                row.avg_traffic,
                row.min_traffic,
                row.max_traffic,
                row.data_points_count,
                row.is_peak_hour,
                format_ts(&row.created_at),
                format_date(row.date),
                row.location,
                row.hour,
            ],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO daily_aggregations
                 (date, location, hour, avg_aqi, min_aqi, max_aqi, avg_traffic, min_traffic,
                  max_traffic, data_points_count, is_peak_hour, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    format_date(row.date),
                    row.location,
                    row.hour,
                    row.avg_aqi,
                    row.min_aqi,
                    row.max_aqi,
                    row.avg_traffic,
                    row.min_traffic,
                    row.max_traffic,
                    row.data_points_count,
                    row.is_peak_hour,
                    format_ts(&row.created_at),
                ],
            )?;
        }
        Ok(())
    }

    fn fetch_daily(&self, date: NaiveDate) -> StoreResult<Vec<DailyAggregation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT date, location, hour, avg_aqi, min_aqi, max_aqi, avg_traffic, min_traffic,
                    max_traffic, data_points_count, is_peak_hour, created_at
             FROM daily_aggregations
             WHERE date = ?1
             ORDER BY location, hour",
        )?;
        let rows = stmt
            .query_map(params![format_date(date)], |row| {
                let date: String = row.get("date")?;
                let created_at: String = row.get("created_at")?;
                Ok(DailyAggregation {
                    date: parse_date(&date)?,
                    location: row.get("location")?,
                    hour: row.get::<_, Option<i64>>("hour")?.map(|h| h as u32),
                    avg_aqi: row.get("avg_aqi")?,
                    min_aqi: row.get("min_aqi")?,
                    max_aqi: row.get("max_aqi")?,
                    avg_traffic: row.get("avg_traffic")?,
                    min_traffic: row.get("min_traffic")?,
                    max_traffic: row.get("max_traffic")?,
                    data_points_count: row.get("data_points_count")?,
                    is_peak_hour: row.get::<_, i64>("is_peak_hour")? != 0,
                    created_at: parse_ts(&created_at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn write_peak(&self, row: &PeakHourSummary) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO peak_hours
             (analysis_date, peak_aqi_hour, peak_aqi_value, peak_aqi_location,
              peak_traffic_hour, peak_traffic_value, peak_traffic_location, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(analysis_date) DO UPDATE SET
                 peak_aqi_hour = excluded.peak_aqi_hour,
                 peak_aqi_value = excluded.peak_aqi_value,
                 peak_aqi_location = excluded.peak_aqi_location,
                 peak_traffic_hour = excluded.peak_traffic_hour,
                 peak_traffic_value = excluded.peak_traffic_value,
                 peak_traffic_location = excluded.peak_traffic_location,
                 created_at = excluded.created_at",
            params![
                format_date(row.analysis_date),
                row.peak_aqi_hour,
                row.peak_aqi_value,
                row.peak_aqi_location,
                row.peak_traffic_hour,
                row.peak_traffic_value,
                row.peak_traffic_location,
                format_ts(&row.created_at),
            ],
        )?;
        Ok(())
    }

    fn fetch_peak_summary(&self, date: NaiveDate) -> StoreResult<Option<PeakHourSummary>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT analysis_date, peak_aqi_hour, peak_aqi_value, peak_aqi_location,
                        peak_traffic_hour, peak_traffic_value, peak_traffic_location, created_at
                 FROM peak_hours WHERE analysis_date = ?1",
                params![format_date(date)],
                Self::row_to_peak,
            )
            .optional()?;
        Ok(row)
    }

    fn record_job_start(&self, job_id: &str) -> StoreResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status) VALUES (?1, ?2, ?3)",
            params![
                job_id,
                format_ts(&Utc::now()),
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![
                format_ts(&Utc::now()),
                status.as_str(),
                error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    fn get_last_job_run(&self, job_id: &str) -> StoreResult<Option<JobRun>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, job_id, started_at, finished_at, status, error_message
                 FROM job_runs WHERE job_id = ?1
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![job_id],
                |row| {
                    let started_at: String = row.get("started_at")?;
                    let finished_at: Option<String> = row.get("finished_at")?;
                    let status: String = row.get("status")?;
                    Ok(JobRun {
                        id: row.get("id")?,
                        job_id: row.get("job_id")?,
                        started_at: parse_ts(&started_at)?,
                        finished_at: match finished_at {
                            Some(s) => Some(parse_ts(&s)?),
                            None => None,
                        },
                        status: JobRunStatus::parse(&status).unwrap_or(JobRunStatus::Failed),
                        error_message: row.get("error_message")?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn ping(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
