//! Per-record processing for the speed layer.

use crate::bus::{Record, RecordHandler};
use crate::model::{is_peak_hour, local_date_hour, LocationSample};
use crate::ops::metrics;
use crate::store::{PipelineStore, StoreResult, UpsertOutcome};
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// New sample: realtime row inserted, hourly aggregation incremented.
    Stored,
    /// Redelivered sample: realtime row refreshed, counters untouched.
    Duplicate,
    /// Malformed or contract-violating record, acknowledged and dropped.
    Dropped,
}

pub struct SpeedProcessor {
    store: Arc<dyn PipelineStore>,
    local_offset: FixedOffset,
    peak_hours: Vec<u32>,
}

impl SpeedProcessor {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        local_offset: FixedOffset,
        peak_hours: Vec<u32>,
    ) -> Self {
        Self {
            store,
            local_offset,
            peak_hours,
        }
    }

    /// Process one decoded payload. Store errors bubble up so the bus
    /// withholds the acknowledgement and redelivers.
    pub fn process(&self, payload: &[u8]) -> StoreResult<ProcessOutcome> {
        let sample: LocationSample = match serde_json::from_slice(payload) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Dropping malformed record: {}", e);
                metrics::record_speed_record("malformed");
                return Ok(ProcessOutcome::Dropped);
            }
        };
        if let Err(e) = sample.validate() {
            warn!(location = %sample.location, "Dropping contract-violating record: {:#}", e);
            metrics::record_speed_record("contract");
            return Ok(ProcessOutcome::Dropped);
        }

        let outcome = self.store.upsert_realtime(&sample, Utc::now())?;
        if outcome == UpsertOutcome::Replaced {
            // Same (location, timestamp) seen before: the hourly row has
            // already counted it.
            debug!(
                location = %sample.location,
                timestamp = %sample.timestamp,
                "Duplicate delivery absorbed"
            );
            metrics::record_speed_record("duplicate");
            return Ok(ProcessOutcome::Duplicate);
        }

        let (date, hour) = local_date_hour(sample.timestamp, self.local_offset);
        self.store.upsert_hourly_increment(
            date,
            hour,
            &sample.location,
            sample.traffic_level,
            sample.aqi_value,
            is_peak_hour(hour, &self.peak_hours),
            Utc::now(),
        )?;
        metrics::record_speed_record("stored");
        Ok(ProcessOutcome::Stored)
    }
}

#[async_trait]
impl RecordHandler for SpeedProcessor {
    async fn handle(&self, record: Record) -> anyhow::Result<()> {
        self.process(&record.payload)?;
        Ok(())
    }
}
