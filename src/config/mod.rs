//! Environment-driven configuration.
//!
//! Every knob comes from the environment (a `.env` file is honored at
//! startup); invalid or missing required values are fatal before any task
//! starts. The monitored location set is static: either the built-in
//! Jakarta stations or a TOML file named by `LOCATIONS_FILE`.

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One monitored location. `station_id` addresses the AQICN feed; the
/// coordinates address the traffic feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Location {
    pub name: String,
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
struct LocationsFile {
    locations: Vec<Location>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub poll_interval: Duration,
    pub upstream_timeout: Duration,
    pub fanout_concurrency: usize,
    pub realtime_retention: Duration,
    pub eviction_interval: Duration,
    pub batch_hourly_minute: u32,
    pub batch_daily_hour_local: u32,
    pub batch_peak_hour_local: u32,
    pub peak_hours_local: Vec<u32>,
    pub local_offset: FixedOffset,
    pub database_path: PathBuf,
    pub bus_topic: String,
    pub bus_partitions: usize,
    pub bus_consumer_group: String,
    pub tomtom_api_key: String,
    pub aqicn_token: String,
    pub locations: Vec<Location>,
    pub ops_port: u16,
    pub batch_run_on_startup: bool,
    pub shutdown_grace: Duration,
    pub shutdown_deadline: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Resolve configuration from a lookup function. Split out from
    /// `from_env` so tests can supply their own environment.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let poll_interval_secs: u64 = parse_or(&get, "POLL_INTERVAL_SECONDS", 15)?;
        if poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECONDS must be positive");
        }
        let upstream_timeout_secs: u64 = parse_or(&get, "UPSTREAM_TIMEOUT_SECONDS", 10)?;
        if upstream_timeout_secs == 0 {
            bail!("UPSTREAM_TIMEOUT_SECONDS must be positive");
        }
        let fanout_concurrency: usize = parse_or(&get, "FANOUT_CONCURRENCY", 32)?;
        if fanout_concurrency == 0 {
            bail!("FANOUT_CONCURRENCY must be positive");
        }
        let realtime_retention_secs: u64 = parse_or(&get, "REALTIME_RETENTION_SECONDS", 3600)?;
        let eviction_interval_secs: u64 =
            parse_or(&get, "REALTIME_EVICTION_INTERVAL_SECONDS", 60)?;
        if eviction_interval_secs == 0 {
            bail!("REALTIME_EVICTION_INTERVAL_SECONDS must be positive");
        }

        let batch_hourly_minute: u32 = parse_or(&get, "BATCH_HOURLY_MINUTE", 5)?;
        if batch_hourly_minute > 59 {
            bail!("BATCH_HOURLY_MINUTE must be 0..=59");
        }
        let batch_daily_hour_local: u32 = parse_or(&get, "BATCH_DAILY_HOUR_LOCAL", 2)?;
        let batch_peak_hour_local: u32 = parse_or(&get, "BATCH_PEAK_HOUR_LOCAL", 3)?;
        if batch_daily_hour_local > 23 || batch_peak_hour_local > 23 {
            bail!("batch job hours must be 0..=23");
        }

        let peak_hours_local = parse_peak_hours(
            &get("PEAK_HOURS_LOCAL").unwrap_or_else(|| "6,7,8,9,16,17,18,19".to_string()),
        )?;

        let offset_hours: i32 = parse_or(&get, "LOCAL_OFFSET_HOURS", 7)?;
        if !(-12..=14).contains(&offset_hours) {
            bail!("LOCAL_OFFSET_HOURS {} out of range", offset_hours);
        }
        let local_offset = FixedOffset::east_opt(offset_hours * 3600)
            .context("LOCAL_OFFSET_HOURS does not form a valid offset")?;

        let database_path =
            PathBuf::from(get("DATABASE_PATH").unwrap_or_else(|| "citypulse.db".to_string()));

        let bus_topic = get("BUS_TOPIC").unwrap_or_else(|| "traffic-aqi-data".to_string());
        let bus_partitions: usize = parse_or(&get, "BUS_PARTITIONS", 4)?;
        if bus_partitions == 0 {
            bail!("BUS_PARTITIONS must be positive");
        }
        let bus_consumer_group =
            get("BUS_CONSUMER_GROUP").unwrap_or_else(|| "speed-layer".to_string());

        let tomtom_api_key = get("TOMTOM_API_KEY")
            .context("TOMTOM_API_KEY must be set in environment variables or .env file")?;
        let aqicn_token = get("AQICN_TOKEN")
            .context("AQICN_TOKEN must be set in environment variables or .env file")?;

        let locations = match get("LOCATIONS_FILE") {
            Some(path) => load_locations_file(&path)?,
            None => default_locations(),
        };
        if locations.is_empty() {
            bail!("location set must not be empty");
        }
        validate_locations(&locations)?;

        let ops_port: u16 = parse_or(&get, "OPS_PORT", 8080)?;
        let batch_run_on_startup: bool = parse_or(&get, "BATCH_RUN_ON_STARTUP", true)?;
        let shutdown_grace_secs: u64 = parse_or(&get, "SHUTDOWN_GRACE_SECONDS", 30)?;
        let shutdown_deadline_secs: u64 = parse_or(&get, "SHUTDOWN_DEADLINE_SECONDS", 60)?;
        if shutdown_deadline_secs < shutdown_grace_secs {
            bail!("SHUTDOWN_DEADLINE_SECONDS must be >= SHUTDOWN_GRACE_SECONDS");
        }

        Ok(Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            upstream_timeout: Duration::from_secs(upstream_timeout_secs),
            fanout_concurrency,
            realtime_retention: Duration::from_secs(realtime_retention_secs),
            eviction_interval: Duration::from_secs(eviction_interval_secs),
            batch_hourly_minute,
            batch_daily_hour_local,
            batch_peak_hour_local,
            peak_hours_local,
            local_offset,
            database_path,
            bus_topic,
            bus_partitions,
            bus_consumer_group,
            tomtom_api_key,
            aqicn_token,
            locations,
            ops_port,
            batch_run_on_startup,
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            shutdown_deadline: Duration::from_secs(shutdown_deadline_secs),
        })
    }

    /// Coordinate lookup for serving-layer rows built from aggregations.
    pub fn location_coordinates(&self) -> HashMap<String, (f64, f64)> {
        self.locations
            .iter()
            .map(|l| (l.name.clone(), (l.latitude, l.longitude)))
            .collect()
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        None => Ok(default),
    }
}

fn parse_peak_hours(raw: &str) -> Result<Vec<u32>> {
    let mut hours = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let hour: u32 = part
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PEAK_HOURS_LOCAL entry '{}': {}", part, e))?;
        if hour > 23 {
            bail!("PEAK_HOURS_LOCAL entry {} out of range", hour);
        }
        if !hours.contains(&hour) {
            hours.push(hour);
        }
    }
    if hours.is_empty() {
        bail!("PEAK_HOURS_LOCAL must name at least one hour");
    }
    hours.sort_unstable();
    Ok(hours)
}

fn load_locations_file(path: &str) -> Result<Vec<Location>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read locations file {}", path))?;
    let parsed: LocationsFile = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse locations file {}", path))?;
    Ok(parsed.locations)
}

fn validate_locations(locations: &[Location]) -> Result<()> {
    for location in locations {
        if location.name.trim().is_empty() {
            bail!("location with empty name");
        }
        if !(-90.0..=90.0).contains(&location.latitude) {
            bail!("location {} latitude out of range", location.name);
        }
        if !(-180.0..=180.0).contains(&location.longitude) {
            bail!("location {} longitude out of range", location.name);
        }
    }
    let mut names: Vec<&str> = locations.iter().map(|l| l.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != locations.len() {
        bail!("duplicate location names in configuration");
    }
    Ok(())
}

/// The Jakarta monitoring stations polled when no locations file is given.
pub fn default_locations() -> Vec<Location> {
    let stations = [
        ("A521365", -6.1861, 106.8236, "Kebon Sirih"),
        ("A495982", -6.1593, 106.8180, "Krukut"),
        ("A416842", -6.2154, 106.8030, "GBK, Gelora"),
        ("A531565", -6.2338, 106.8769, "Jakarta Timur Kebon Nanas"),
        ("A515938", -6.1756, 106.6449, "Tangerang Benteng Betawi"),
        ("A521380", -6.1714, 106.7622, "Kedoya Utara"),
        ("A570235", -6.2224, 106.7883, "Grogol Utara"),
        ("A537937", -6.2373, 106.7861, "Gunung"),
        ("A511573", -6.3498, 106.7782, "Cinere"),
        ("@8294", -6.1911, 106.8491, "Kemayoran"),
    ];
    stations
        .iter()
        .map(|(station_id, latitude, longitude, name)| Location {
            name: name.to_string(),
            station_id: station_id.to_string(),
            latitude: *latitude,
            longitude: *longitude,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env_with<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    const REQUIRED: &[(&str, &str)] = &[("TOMTOM_API_KEY", "tt-key"), ("AQICN_TOKEN", "aq-token")];

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(env_with(REQUIRED)).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.fanout_concurrency, 32);
        assert_eq!(config.realtime_retention, Duration::from_secs(3600));
        assert_eq!(config.eviction_interval, Duration::from_secs(60));
        assert_eq!(config.batch_hourly_minute, 5);
        assert_eq!(config.batch_daily_hour_local, 2);
        assert_eq!(config.batch_peak_hour_local, 3);
        assert_eq!(config.peak_hours_local, vec![6, 7, 8, 9, 16, 17, 18, 19]);
        assert_eq!(config.local_offset.local_minus_utc(), 7 * 3600);
        assert_eq!(config.bus_topic, "traffic-aqi-data");
        assert_eq!(config.bus_partitions, 4);
        assert_eq!(config.locations.len(), 10);
        assert!(config.batch_run_on_startup);
    }

    #[test]
    fn test_resolve_missing_api_keys_is_fatal() {
        let result = AppConfig::resolve(env_with(&[("TOMTOM_API_KEY", "tt-key")]));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("AQICN_TOKEN"));
    }

    #[test]
    fn test_resolve_overrides() {
        let pairs = [
            ("TOMTOM_API_KEY", "tt-key"),
            ("AQICN_TOKEN", "aq-token"),
            ("POLL_INTERVAL_SECONDS", "30"),
            ("PEAK_HOURS_LOCAL", "7, 8, 17"),
            ("LOCAL_OFFSET_HOURS", "-5"),
            ("BUS_TOPIC", "city-data"),
            ("BATCH_RUN_ON_STARTUP", "false"),
        ];
        let config = AppConfig::resolve(env_with(&pairs)).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.peak_hours_local, vec![7, 8, 17]);
        assert_eq!(config.local_offset.local_minus_utc(), -5 * 3600);
        assert_eq!(config.bus_topic, "city-data");
        assert!(!config.batch_run_on_startup);
    }

    #[test]
    fn test_resolve_rejects_invalid_values() {
        for (name, value) in [
            ("POLL_INTERVAL_SECONDS", "0"),
            ("POLL_INTERVAL_SECONDS", "abc"),
            ("BATCH_HOURLY_MINUTE", "60"),
            ("BATCH_DAILY_HOUR_LOCAL", "24"),
            ("LOCAL_OFFSET_HOURS", "15"),
            ("PEAK_HOURS_LOCAL", "25"),
            ("PEAK_HOURS_LOCAL", ","),
            ("BUS_PARTITIONS", "0"),
            ("FANOUT_CONCURRENCY", "0"),
        ] {
            let pairs = [
                ("TOMTOM_API_KEY", "tt-key"),
                ("AQICN_TOKEN", "aq-token"),
                (name, value),
            ];
            let result = AppConfig::resolve(env_with(&pairs));
            assert!(result.is_err(), "expected {}={} to be rejected", name, value);
        }
    }

    #[test]
    fn test_peak_hours_parse_dedups_and_sorts() {
        assert_eq!(parse_peak_hours("17,6,6,8").unwrap(), vec![6, 8, 17]);
    }

    #[test]
    fn test_locations_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[locations]]
name = "Sudirman"
station_id = "A100001"
latitude = -6.21
longitude = 106.82

[[locations]]
name = "Thamrin"
station_id = "A100002"
latitude = -6.19
longitude = 106.82
"#
        )
        .unwrap();

        let pairs = [
            ("TOMTOM_API_KEY", "tt-key"),
            ("AQICN_TOKEN", "aq-token"),
            ("LOCATIONS_FILE", file.path().to_str().unwrap()),
        ];
        let config = AppConfig::resolve(|name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        assert_eq!(config.locations.len(), 2);
        assert_eq!(config.locations[0].name, "Sudirman");
        let coords = config.location_coordinates();
        assert_eq!(coords["Thamrin"], (-6.19, 106.82));
    }

    #[test]
    fn test_duplicate_location_names_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[locations]]
name = "Sudirman"
station_id = "A1"
latitude = -6.2
longitude = 106.8

[[locations]]
name = "Sudirman"
station_id = "A2"
latitude = -6.3
longitude = 106.9
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let result = AppConfig::resolve(move |name| match name {
            "TOMTOM_API_KEY" => Some("k".to_string()),
            "AQICN_TOKEN" => Some("t".to_string()),
            "LOCATIONS_FILE" => Some(path.clone()),
            _ => None,
        });
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }
}
