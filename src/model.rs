//! Core data types shared across the pipeline.
//!
//! A `LocationSample` is the unit of work: one enriched observation for one
//! monitored location, carried as JSON on the bus and appended to the raw
//! log. Derived fields (`aqi_category`, `is_peak_hour`) are computed once at
//! ingestion and travel with the sample.

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// AQI category bands as reported to consumers.
///
/// Band boundaries are inclusive upper bounds: 0-50 Good, 51-100 Moderate,
/// 101-150 Unhealthy for Sensitive Groups, 151-200 Unhealthy, 201-300 Very
/// Unhealthy, 301+ Hazardous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    #[serde(rename = "Unhealthy for Sensitive Groups")]
    UnhealthySensitive,
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: u32) -> Self {
        match aqi {
            0..=50 => AqiCategory::Good,
            51..=100 => AqiCategory::Moderate,
            101..=150 => AqiCategory::UnhealthySensitive,
            151..=200 => AqiCategory::Unhealthy,
            201..=300 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthySensitive => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Good" => Some(AqiCategory::Good),
            "Moderate" => Some(AqiCategory::Moderate),
            "Unhealthy for Sensitive Groups" => Some(AqiCategory::UnhealthySensitive),
            "Unhealthy" => Some(AqiCategory::Unhealthy),
            "Very Unhealthy" => Some(AqiCategory::VeryUnhealthy),
            "Hazardous" => Some(AqiCategory::Hazardous),
            _ => None,
        }
    }
}

impl std::fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enriched observation for one monitored location.
///
/// Wire format on the bus: JSON with an ISO-8601 `timestamp` and absent
/// metrics serialized as `null`. At least one of `aqi_value` /
/// `traffic_level` is present in any sample the poller emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub aqi_value: Option<u32>,
    pub traffic_level: Option<u8>,
    pub aqi_category: Option<AqiCategory>,
    pub is_peak_hour: bool,
}

impl LocationSample {
    /// Check the data contract a decoded sample must satisfy before it is
    /// allowed into the store. Violations are drop-and-log, never retried.
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            bail!("empty location");
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            bail!("latitude {} out of range", self.latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            bail!("longitude {} out of range", self.longitude);
        }
        if let Some(level) = self.traffic_level {
            if !(1..=5).contains(&level) {
                bail!("traffic level {} out of range", level);
            }
        }
        if self.aqi_value.is_none() && self.traffic_level.is_none() {
            bail!("sample carries neither metric");
        }
        if self.aqi_value.is_some() != self.aqi_category.is_some() {
            bail!("aqi_category must be present exactly when aqi_value is");
        }
        Ok(())
    }
}

/// Calendar date and hour of an instant under the configured fixed offset.
///
/// This is the only place local time enters the pipeline: hourly bucketing
/// and the peak-hour predicate. Everything stored is UTC.
pub fn local_date_hour(ts: DateTime<Utc>, offset: FixedOffset) -> (NaiveDate, u32) {
    let local = ts.with_timezone(&offset);
    (local.date_naive(), local.hour())
}

/// Whether a local hour falls in the configured peak set.
pub fn is_peak_hour(local_hour: u32, peak_hours: &[u32]) -> bool {
    peak_hours.contains(&local_hour)
}
