//! CityPulse Pipeline Library
//!
//! Lambda-architecture pipeline for traffic and air-quality monitoring:
//! an ingestion poller feeds a partitioned bus and an append-only raw log,
//! a speed layer maintains the realtime view, a batch layer rebuilds
//! authoritative aggregations, and a serving layer unifies both paths.
//! Exposed as a library for the integration test suite.

pub mod batch;
pub mod bus;
pub mod config;
pub mod ingestion;
pub mod model;
pub mod ops;
pub mod serving;
pub mod speed;
pub mod sqlite_persistence;
pub mod store;
pub mod upstream;

// Re-export commonly used types for convenience
pub use bus::{MessageBus, PartitionedBus};
pub use config::AppConfig;
pub use serving::ServingLayer;
pub use store::{PipelineStore, SqliteStore};
