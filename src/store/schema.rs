//! SQLite schema for the pipeline database.
//!
//! Six logical tables: the append-only raw log, the realtime active set,
//! hourly and daily aggregations, peak-hour summaries, and the batch job
//! audit log. All timestamps are RFC 3339 UTC text; dates are local
//! calendar dates under the configured offset. Changes are additive only.
#![allow(dead_code)]

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// Append-only log of every sample the poller emitted. Duplicates on
/// (timestamp, location) are permitted; batch aggregation deduplicates.
const RAW_DATA_TABLE_V1: Table = Table {
    name: "raw_data",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("latitude", &SqlType::Real, non_null = true),
        sqlite_column!("longitude", &SqlType::Real, non_null = true),
        sqlite_column!("aqi_value", &SqlType::Integer),
        sqlite_column!("aqi_category", &SqlType::Text),
        sqlite_column!("traffic_level", &SqlType::Integer),
        sqlite_column!(
            "is_peak_hour",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[
        ("idx_raw_timestamp", "timestamp"),
        ("idx_raw_location_timestamp", "location, timestamp"),
    ],
    unique_constraints: &[],
};

/// Realtime active set. Eviction flips is_active; a separate maintenance
/// pass physically deletes long-inactive rows.
const REALTIME_DATA_TABLE_V1: Table = Table {
    name: "realtime_data",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("latitude", &SqlType::Real, non_null = true),
        sqlite_column!("longitude", &SqlType::Real, non_null = true),
        sqlite_column!("aqi_value", &SqlType::Integer),
        sqlite_column!("aqi_category", &SqlType::Text),
        sqlite_column!("traffic_level", &SqlType::Integer),
        sqlite_column!(
            "is_peak_hour",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("processing_timestamp", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
    ],
    indices: &[("idx_realtime_active_timestamp", "is_active, timestamp")],
    unique_constraints: &[&["location", "timestamp"]],
};

const HOURLY_AGGREGATIONS_TABLE_V1: Table = Table {
    name: "hourly_aggregations",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("date", &SqlType::Text, non_null = true),
        sqlite_column!("hour", &SqlType::Integer, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("avg_traffic_level", &SqlType::Real),
        sqlite_column!(
            "traffic_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("avg_aqi_value", &SqlType::Real),
        sqlite_column!(
            "aqi_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "total_records",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_peak_hour",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_hourly_date", "date")],
    unique_constraints: &[&["date", "hour", "location"]],
};

/// Batch aggregations. hour is NULL for whole-day rows; NULLs are distinct
/// under SQLite unique constraints, so write_daily upserts explicitly.
const DAILY_AGGREGATIONS_TABLE_V1: Table = Table {
    name: "daily_aggregations",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("date", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("hour", &SqlType::Integer),
        sqlite_column!("avg_aqi", &SqlType::Real),
        sqlite_column!("min_aqi", &SqlType::Integer),
        sqlite_column!("max_aqi", &SqlType::Integer),
        sqlite_column!("avg_traffic", &SqlType::Real),
        sqlite_column!("min_traffic", &SqlType::Integer),
        sqlite_column!("max_traffic", &SqlType::Integer),
        sqlite_column!("data_points_count", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "is_peak_hour",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_daily_date_location", "date, location")],
    unique_constraints: &[],
};

const PEAK_HOURS_TABLE_V1: Table = Table {
    name: "peak_hours",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("analysis_date", &SqlType::Text, non_null = true),
        sqlite_column!("peak_aqi_hour", &SqlType::Integer, non_null = true),
        sqlite_column!("peak_aqi_value", &SqlType::Real, non_null = true),
        sqlite_column!("peak_aqi_location", &SqlType::Text, non_null = true),
        sqlite_column!("peak_traffic_hour", &SqlType::Integer, non_null = true),
        sqlite_column!("peak_traffic_value", &SqlType::Real, non_null = true),
        sqlite_column!("peak_traffic_location", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["analysis_date"]],
};

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
    ],
    indices: &[("idx_job_runs_job_id", "job_id")],
    unique_constraints: &[],
};

pub const PIPELINE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        RAW_DATA_TABLE_V1,
        REALTIME_DATA_TABLE_V1,
        HOURLY_AGGREGATIONS_TABLE_V1,
        DAILY_AGGREGATIONS_TABLE_V1,
        PEAK_HOURS_TABLE_V1,
        JOB_RUNS_TABLE_V1,
    ],
    migration: None,
}];
