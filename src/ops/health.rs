//! Liveness heartbeats for the long-running tasks.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// A task is considered live while its last heartbeat is within
/// `STALL_FACTOR` times its period.
const STALL_FACTOR: u32 = 3;

/// Shared heartbeat state. The poller marks each completed cycle, the
/// eviction task each maintenance pass; the ops server reads both.
pub struct HealthState {
    started_at_ms: i64,
    last_cycle_ms: AtomicI64,
    last_maintenance_ms: AtomicI64,
    poll_interval: Duration,
    eviction_interval: Duration,
}

impl HealthState {
    pub fn new(poll_interval: Duration, eviction_interval: Duration) -> Self {
        Self {
            started_at_ms: Utc::now().timestamp_millis(),
            last_cycle_ms: AtomicI64::new(0),
            last_maintenance_ms: AtomicI64::new(0),
            poll_interval,
            eviction_interval,
        }
    }

    pub fn mark_cycle(&self) {
        self.last_cycle_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn mark_maintenance(&self) {
        self.last_maintenance_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn is_live(&self) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        self.heartbeat_fresh(&self.last_cycle_ms, self.poll_interval, now_ms)
            && self.heartbeat_fresh(&self.last_maintenance_ms, self.eviction_interval, now_ms)
    }

    fn heartbeat_fresh(&self, heartbeat: &AtomicI64, period: Duration, now_ms: i64) -> bool {
        // A task that has not beaten yet is measured from process start, so
        // startup gets the same grace as steady state.
        let last = heartbeat.load(Ordering::Relaxed).max(self.started_at_ms);
        let allowance = period
            .saturating_mul(STALL_FACTOR)
            .as_millis()
            .min(i64::MAX as u128) as i64;
        now_ms - last <= allowance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_process_is_live() {
        let health = HealthState::new(Duration::from_secs(15), Duration::from_secs(60));
        assert!(health.is_live());
    }

    #[test]
    fn test_stalled_heartbeat_goes_unhealthy() {
        let mut health = HealthState::new(Duration::from_millis(1), Duration::from_secs(3600));
        // Pretend the process started long ago and the poller never beat.
        health.started_at_ms = Utc::now().timestamp_millis() - 10_000;
        health.mark_maintenance();
        assert!(!health.is_live());

        health.mark_cycle();
        assert!(health.is_live());
    }
}
