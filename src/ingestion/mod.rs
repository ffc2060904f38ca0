//! Ingestion layer: the upstream poller and its retry policies.

mod backoff;
mod poller;

pub use backoff::BackoffPolicy;
pub use poller::{CycleStats, IngestionPoller, PollerSettings};
