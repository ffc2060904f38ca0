//! Scripted feed implementation for tests and local development.

use super::{FeedError, FeedResult, UpstreamFeeds};
use crate::config::Location;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

type Script<T> = Mutex<HashMap<String, VecDeque<FeedResult<T>>>>;

/// Feeds that answer from per-location queues of scripted outcomes.
///
/// When a location's queue is exhausted the feed keeps returning the last
/// configured steady-state value, or a permanent error if none was set.
#[derive(Default)]
pub struct ScriptedFeeds {
    traffic_script: Script<u8>,
    aqi_script: Script<u32>,
    steady_traffic: Mutex<HashMap<String, u8>>,
    steady_aqi: Mutex<HashMap<String, u32>>,
}

impl ScriptedFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed value returned once any scripted outcomes are drained.
    pub fn set_steady_traffic(&self, location: &str, level: u8) {
        self.steady_traffic
            .lock()
            .unwrap()
            .insert(location.to_string(), level);
    }

    pub fn set_steady_aqi(&self, location: &str, aqi: u32) {
        self.steady_aqi
            .lock()
            .unwrap()
            .insert(location.to_string(), aqi);
    }

    /// Queue one outcome for the next traffic call for this location.
    pub fn push_traffic(&self, location: &str, outcome: FeedResult<u8>) {
        self.traffic_script
            .lock()
            .unwrap()
            .entry(location.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn push_aqi(&self, location: &str, outcome: FeedResult<u32>) {
        self.aqi_script
            .lock()
            .unwrap()
            .entry(location.to_string())
            .or_default()
            .push_back(outcome);
    }

    fn next<T: Copy>(
        script: &Script<T>,
        steady: &Mutex<HashMap<String, T>>,
        location: &str,
    ) -> FeedResult<T> {
        if let Some(outcome) = script
            .lock()
            .unwrap()
            .get_mut(location)
            .and_then(|queue| queue.pop_front())
        {
            return outcome;
        }
        steady
            .lock()
            .unwrap()
            .get(location)
            .copied()
            .ok_or_else(|| FeedError::Permanent(format!("no scripted value for {}", location)))
    }
}

#[async_trait]
impl UpstreamFeeds for ScriptedFeeds {
    async fn fetch_traffic(&self, location: &Location, _deadline: Duration) -> FeedResult<u8> {
        Self::next(&self.traffic_script, &self.steady_traffic, &location.name)
    }

    async fn fetch_aqi(&self, location: &Location, _deadline: Duration) -> FeedResult<u32> {
        Self::next(&self.aqi_script, &self.steady_aqi, &location.name)
    }
}
