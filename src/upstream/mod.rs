//! Upstream feed adapters.
//!
//! Two external feeds supply the pipeline: TomTom flow-segment data for
//! traffic congestion and the AQICN station feed for air quality. Both sit
//! behind the `UpstreamFeeds` capability so the poller never knows which
//! HTTP API (or test fake) is answering.

mod http;
mod scripted;

pub use http::{traffic_level_from_speeds, HttpUpstreamFeeds};
pub use scripted::ScriptedFeeds;

use crate::config::Location;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Timeout, connection failure or 5xx. Worth retrying within the cycle.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// The feed answered but cannot produce a value for this location.
    /// Retrying would not help; the metric is absent for this cycle.
    #[error("permanent upstream error: {0}")]
    Permanent(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

/// Capability interface over the two upstream feeds.
///
/// Each call is for one location and must complete within the deadline.
#[async_trait]
pub trait UpstreamFeeds: Send + Sync {
    /// Congestion level 1..=5, derived from measured vs free-flow speed.
    async fn fetch_traffic(&self, location: &Location, deadline: Duration) -> FeedResult<u8>;

    /// Non-negative air-quality index for the location's station.
    async fn fetch_aqi(&self, location: &Location, deadline: Duration) -> FeedResult<u32>;
}
