//! Speed layer: the bus consumer and realtime-set maintenance.
//!
//! Each record is decoded, upserted into the realtime set and folded into
//! the incremental hourly aggregation. Redeliveries are absorbed by the
//! insert-vs-replace distinction of the realtime upsert: only a genuinely
//! new (location, timestamp) row increments the hourly counters.

mod processor;

pub use processor::{ProcessOutcome, SpeedProcessor};

use crate::ops::{metrics, HealthState};
use crate::store::PipelineStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long deactivated rows linger before the physical delete.
const PURGE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Periodic realtime-set maintenance: deactivate rows older than the
/// retention window, then physically delete rows that have been inactive
/// for a day.
pub async fn eviction_task(
    store: Arc<dyn PipelineStore>,
    retention: Duration,
    interval: Duration,
    health: Arc<HealthState>,
    cancel: CancellationToken,
) {
    info!(
        retention_secs = retention.as_secs(),
        interval_secs = interval.as_secs(),
        "Starting realtime eviction task"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = Utc::now();
        let retention_cutoff = now
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(1));
        match store.evict_stale_realtime(retention_cutoff) {
            Ok(count) if count > 0 => {
                metrics::REALTIME_EVICTED_TOTAL.inc_by(count as f64);
                info!("Deactivated {} stale realtime rows", count);
            }
            Ok(_) => {}
            Err(e) => error!("Realtime eviction failed: {}", e),
        }

        let purge_cutoff = now
            - chrono::Duration::from_std(PURGE_AFTER).unwrap_or_else(|_| chrono::Duration::hours(24));
        match store.purge_inactive_realtime(purge_cutoff) {
            Ok(count) if count > 0 => info!("Purged {} inactive realtime rows", count),
            Ok(_) => {}
            Err(e) => error!("Realtime purge failed: {}", e),
        }

        health.mark_maintenance();
    }
    info!("Realtime eviction task stopped");
}
