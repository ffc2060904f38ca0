//! HTTP clients for the TomTom traffic and AQICN air-quality feeds.

use super::{FeedError, FeedResult, UpstreamFeeds};
use crate::config::Location;
use crate::ops::metrics;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};

const TOMTOM_BASE_URL: &str =
    "https://api.tomtom.com/traffic/services/4/flowSegmentData/absolute/10/json";
const AQICN_BASE_URL: &str = "https://api.waqi.info/feed";

/// Congestion level from the ratio of lost speed to free-flow speed.
/// Returns 1..=5 where 5 is most congested.
pub fn traffic_level_from_speeds(free_flow_speed: f64, current_speed: f64) -> u8 {
    if free_flow_speed <= 0.0 {
        return 1;
    }
    let ratio = (free_flow_speed - current_speed) / free_flow_speed;
    if ratio < 0.1 {
        1
    } else if ratio < 0.3 {
        2
    } else if ratio < 0.5 {
        3
    } else if ratio < 0.7 {
        4
    } else {
        5
    }
}

#[derive(Debug, Deserialize)]
struct FlowSegmentResponse {
    #[serde(rename = "flowSegmentData")]
    flow_segment_data: Option<FlowSegmentData>,
}

#[derive(Debug, Deserialize)]
struct FlowSegmentData {
    #[serde(rename = "freeFlowSpeed", default)]
    free_flow_speed: f64,
    #[serde(rename = "currentSpeed", default)]
    current_speed: f64,
}

#[derive(Debug, Deserialize)]
struct AqicnResponse {
    status: String,
    data: Option<AqicnData>,
}

#[derive(Debug, Deserialize)]
struct AqicnData {
    /// The station feed reports `aqi` as a number, but degraded stations
    /// answer with a placeholder string such as "-".
    aqi: serde_json::Value,
}

pub struct HttpUpstreamFeeds {
    client: reqwest::Client,
    tomtom_base_url: String,
    aqicn_base_url: String,
    tomtom_api_key: String,
    aqicn_token: String,
}

impl HttpUpstreamFeeds {
    pub fn new(tomtom_api_key: String, aqicn_token: String) -> Self {
        Self::with_base_urls(
            tomtom_api_key,
            aqicn_token,
            TOMTOM_BASE_URL.to_string(),
            AQICN_BASE_URL.to_string(),
        )
    }

    /// Override the upstream endpoints, used when pointing at a local stub.
    pub fn with_base_urls(
        tomtom_api_key: String,
        aqicn_token: String,
        tomtom_base_url: String,
        aqicn_base_url: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            tomtom_base_url: tomtom_base_url.trim_end_matches('/').to_string(),
            aqicn_base_url: aqicn_base_url.trim_end_matches('/').to_string(),
            tomtom_api_key,
            aqicn_token,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        feed: &'static str,
        url: &str,
        deadline: Duration,
    ) -> FeedResult<T> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| {
                metrics::record_upstream_error(feed, "connection");
                if e.is_timeout() || e.is_connect() {
                    FeedError::Transient(e.to_string())
                } else {
                    FeedError::Permanent(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            metrics::record_upstream_error(feed, "status");
            return Err(FeedError::Transient(format!("status {}", status)));
        }
        if !status.is_success() {
            metrics::record_upstream_error(feed, "status");
            return Err(FeedError::Permanent(format!("status {}", status)));
        }

        let parsed = response.json::<T>().await.map_err(|e| {
            metrics::record_upstream_error(feed, "parse");
            FeedError::Permanent(format!("malformed response: {}", e))
        })?;
        metrics::record_upstream_request(feed, start.elapsed());
        Ok(parsed)
    }
}

#[async_trait]
impl UpstreamFeeds for HttpUpstreamFeeds {
    async fn fetch_traffic(&self, location: &Location, deadline: Duration) -> FeedResult<u8> {
        let url = format!(
            "{}?point={},{}&key={}",
            self.tomtom_base_url, location.latitude, location.longitude, self.tomtom_api_key
        );
        let response: FlowSegmentResponse = self.get_json("traffic", &url, deadline).await?;
        let flow = response
            .flow_segment_data
            .ok_or_else(|| FeedError::Permanent("no flow segment data".to_string()))?;
        Ok(traffic_level_from_speeds(
            flow.free_flow_speed,
            flow.current_speed,
        ))
    }

    async fn fetch_aqi(&self, location: &Location, deadline: Duration) -> FeedResult<u32> {
        let url = format!(
            "{}/{}/?token={}",
            self.aqicn_base_url, location.station_id, self.aqicn_token
        );
        let response: AqicnResponse = self.get_json("aqi", &url, deadline).await?;
        if response.status != "ok" {
            return Err(FeedError::Permanent(format!(
                "station status: {}",
                response.status
            )));
        }
        let aqi = response
            .data
            .and_then(|d| match d.aqi {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.parse::<i64>().ok(),
                _ => None,
            })
            .ok_or_else(|| FeedError::Permanent("station reports no AQI value".to_string()))?;
        if aqi < 0 {
            return Err(FeedError::Permanent(format!("negative AQI {}", aqi)));
        }
        Ok(aqi as u32)
    }
}
