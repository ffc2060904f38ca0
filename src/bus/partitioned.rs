//! In-process partitioned broker backed by bounded mpsc channels.
//!
//! Records are routed by key hash, so one location always lands on the same
//! partition and keeps its order. Each partition is a bounded channel: when
//! the consumer lags, publishers wait up to a bounded interval and then see
//! a transient failure rather than buffering without limit.

use super::{MessageBus, PublishError, Record, RecordHandler, SubscribeError};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub topic: String,
    pub partitions: usize,
    /// Per-partition queue depth before publishers start waiting.
    pub queue_depth: usize,
    /// Records larger than this are rejected permanently.
    pub max_payload_bytes: usize,
    /// How long a publisher waits on a full partition before the attempt
    /// fails transiently.
    pub publish_wait: Duration,
    /// Base delay before an unacknowledged record is redelivered; doubles
    /// per attempt up to `redelivery_delay_cap`.
    pub redelivery_delay: Duration,
    pub redelivery_delay_cap: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            topic: "traffic-aqi-data".to_string(),
            partitions: 4,
            queue_depth: 1024,
            max_payload_bytes: 1024 * 1024,
            publish_wait: Duration::from_secs(5),
            redelivery_delay: Duration::from_millis(500),
            redelivery_delay_cap: Duration::from_secs(30),
        }
    }
}

struct Envelope {
    key: String,
    payload: Vec<u8>,
    offset: u64,
}

pub struct PartitionedBus {
    settings: BusSettings,
    senders: Vec<mpsc::Sender<Envelope>>,
    receivers: Mutex<Option<Vec<mpsc::Receiver<Envelope>>>>,
    next_offsets: Vec<AtomicU64>,
}

impl PartitionedBus {
    pub fn new(settings: BusSettings) -> Self {
        let partitions = settings.partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        let mut next_offsets = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::channel(settings.queue_depth.max(1));
            senders.push(tx);
            receivers.push(rx);
            next_offsets.push(AtomicU64::new(0));
        }
        Self {
            settings,
            senders,
            receivers: Mutex::new(Some(receivers)),
            next_offsets,
        }
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }
}

#[async_trait]
impl MessageBus for PartitionedBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        if topic != self.settings.topic {
            return Err(PublishError::Permanent(format!("unknown topic: {}", topic)));
        }
        if payload.len() > self.settings.max_payload_bytes {
            return Err(PublishError::Permanent(format!(
                "payload of {} bytes exceeds bound of {}",
                payload.len(),
                self.settings.max_payload_bytes
            )));
        }

        let partition = self.partition_for(key);
        let offset = self.next_offsets[partition].fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope {
            key: key.to_string(),
            payload: payload.to_vec(),
            offset,
        };

        match self.senders[partition]
            .send_timeout(envelope, self.settings.publish_wait)
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(PublishError::Transient(
                format!("partition {} saturated", partition),
            )),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(PublishError::Transient("bus is shut down".to_string()))
            }
        }
    }

    fn subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn RecordHandler>,
        cancel: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, SubscribeError> {
        if topic != self.settings.topic {
            return Err(SubscribeError::UnknownTopic(topic.to_string()));
        }
        let receivers = self
            .receivers
            .lock()
            .expect("bus receiver mutex poisoned")
            .take()
            .ok_or(SubscribeError::AlreadySubscribed)?;

        info!(
            topic = %self.settings.topic,
            group = %group,
            partitions = receivers.len(),
            "Attaching consumer group"
        );

        let handles = receivers
            .into_iter()
            .enumerate()
            .map(|(partition, rx)| {
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                let group = group.to_string();
                let base_delay = self.settings.redelivery_delay;
                let delay_cap = self.settings.redelivery_delay_cap;
                tokio::spawn(consume_partition(
                    partition, rx, handler, cancel, group, base_delay, delay_cap,
                ))
            })
            .collect();
        Ok(handles)
    }

    fn is_ready(&self) -> bool {
        self.senders.iter().all(|tx| !tx.is_closed())
    }
}

/// Sequential per-partition delivery loop. A record is acknowledged only by
/// handler success; failures redeliver the same record with growing delay,
/// preserving order within the partition.
async fn consume_partition(
    partition: usize,
    mut rx: mpsc::Receiver<Envelope>,
    handler: Arc<dyn RecordHandler>,
    cancel: CancellationToken,
    group: String,
    base_delay: Duration,
    delay_cap: Duration,
) {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let mut attempt: u32 = 0;
        loop {
            let record = Record {
                partition,
                offset: envelope.offset,
                key: envelope.key.clone(),
                payload: envelope.payload.clone(),
                attempt,
            };
            match handler.handle(record).await {
                Ok(()) => {
                    debug!(
                        group = %group,
                        partition,
                        offset = envelope.offset,
                        "Record acknowledged"
                    );
                    break;
                }
                Err(e) => {
                    attempt += 1;
                    let delay = redelivery_delay(base_delay, delay_cap, attempt);
                    warn!(
                        group = %group,
                        partition,
                        offset = envelope.offset,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Handler failed, redelivering: {:#}",
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
    debug!(group = %group, partition, "Consumer partition worker stopped");
}

fn redelivery_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn settings(partitions: usize) -> BusSettings {
        BusSettings {
            topic: "test-topic".to_string(),
            partitions,
            queue_depth: 8,
            max_payload_bytes: 64,
            publish_wait: Duration::from_millis(50),
            redelivery_delay: Duration::from_millis(5),
            redelivery_delay_cap: Duration::from_millis(20),
        }
    }

    struct Collector {
        records: Mutex<Vec<(String, Vec<u8>, u32)>>,
        fail_first: AtomicUsize,
    }

    impl Collector {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                fail_first: AtomicUsize::new(fail_first),
            })
        }
    }

    #[async_trait]
    impl RecordHandler for Collector {
        async fn handle(&self, record: Record) -> anyhow::Result<()> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("induced failure");
            }
            self.records
                .lock()
                .unwrap()
                .push((record.key, record.payload, record.attempt));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_rejects_unknown_topic_and_oversized_payload() {
        let bus = PartitionedBus::new(settings(2));
        let err = bus.publish("other", "k", b"x").await.unwrap_err();
        assert!(matches!(err, PublishError::Permanent(_)));

        let big = vec![0u8; 65];
        let err = bus.publish("test-topic", "k", &big).await.unwrap_err();
        assert!(matches!(err, PublishError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_per_key_order_preserved() {
        let bus = PartitionedBus::new(settings(4));
        let collector = Collector::new(0);
        let cancel = CancellationToken::new();
        let handles = bus
            .subscribe(
                "test-topic",
                "group",
                collector.clone(),
                cancel.clone(),
            )
            .unwrap();

        for i in 0..20u8 {
            bus.publish("test-topic", "location-a", &[i]).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        let records = collector.records.lock().unwrap();
        let payloads: Vec<u8> = records.iter().map(|(_, p, _)| p[0]).collect();
        assert_eq!(payloads, (0..20).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_failed_handler_gets_redelivery() {
        let bus = PartitionedBus::new(settings(1));
        bus.publish("test-topic", "k", b"a").await.unwrap();

        let collector = Collector::new(2);
        let cancel = CancellationToken::new();
        let handles = bus
            .subscribe("test-topic", "group", collector.clone(), cancel.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        let records = collector.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        // Two induced failures means the record finally landed on attempt 2.
        assert_eq!(records[0].2, 2);
    }

    #[tokio::test]
    async fn test_second_subscribe_rejected() {
        let bus = PartitionedBus::new(settings(1));
        let cancel = CancellationToken::new();
        let first = bus.subscribe("test-topic", "g", Collector::new(0), cancel.clone());
        assert!(first.is_ok());
        let second = bus.subscribe("test-topic", "g", Collector::new(0), cancel.clone());
        assert!(matches!(second, Err(SubscribeError::AlreadySubscribed)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_publish_saturation_is_transient() {
        let mut s = settings(1);
        s.queue_depth = 1;
        s.publish_wait = Duration::from_millis(10);
        let bus = PartitionedBus::new(s);

        bus.publish("test-topic", "k", b"a").await.unwrap();
        // No consumer attached: the partition stays full.
        let err = bus.publish("test-topic", "k", b"b").await.unwrap_err();
        assert!(matches!(err, PublishError::Transient(_)));
    }

    #[test]
    fn test_redelivery_delay_doubles_up_to_cap() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_millis(450);
        assert_eq!(redelivery_delay(base, cap, 1), Duration::from_millis(100));
        assert_eq!(redelivery_delay(base, cap, 2), Duration::from_millis(200));
        assert_eq!(redelivery_delay(base, cap, 3), Duration::from_millis(400));
        assert_eq!(redelivery_delay(base, cap, 4), cap);
        assert_eq!(redelivery_delay(base, cap, 30), cap);
    }
}
