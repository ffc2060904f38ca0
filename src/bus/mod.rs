//! Publish/subscribe bus adapter.
//!
//! The pipeline talks to an ordered, partitioned, at-least-once message bus
//! through the `MessageBus` trait: records with the same key land on the
//! same partition and are delivered in order, consumers acknowledge by
//! returning success, and unacknowledged records are redelivered after a
//! bounded delay. `PartitionedBus` is the in-process broker used by the
//! single-binary deployment; a networked broker client would implement the
//! same trait.

mod partitioned;

pub use partitioned::{BusSettings, PartitionedBus};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Broker unreachable or saturated past the bounded wait. Callers retry
    /// with capped exponential backoff.
    #[error("transient publish failure: {0}")]
    Transient(String),

    /// The record can never be accepted (oversized payload, unknown topic).
    /// Callers drop it and log.
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("topic already has a consumer group attached")]
    AlreadySubscribed,
}

/// One delivered record. `attempt` is zero on first delivery and counts
/// redeliveries of the same record.
#[derive(Debug, Clone)]
pub struct Record {
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub attempt: u32,
}

/// Record consumer. Returning `Ok` acknowledges the record; returning `Err`
/// leaves it unacknowledged and the bus redelivers it after a bounded
/// delay. Handlers must therefore be idempotent.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: Record) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one record. The key selects the partition, so per-key order
    /// is preserved end to end.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Attach a consumer group: one sequential worker per partition, each
    /// invoking the handler with at-least-once semantics. Returns the
    /// worker handles; workers drain until the token is cancelled.
    fn subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn RecordHandler>,
        cancel: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, SubscribeError>;

    /// Whether the bus can currently accept publishes.
    fn is_ready(&self) -> bool;
}
