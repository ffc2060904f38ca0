//! Retry backoff for the poller's publish and raw-append paths.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter, capped.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Delay before the given retry (0 = before the first retry), jittered
    /// by +/-20% so synchronized producers do not thundering-herd a
    /// recovering broker.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(capped * jitter)
    }

    pub fn publish_default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    pub fn raw_append_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(450),
            multiplier: 2.0,
        };
        // Jitter is +/-20%, so compare against the jittered envelope.
        let d0 = policy.delay_for(0).as_secs_f64();
        assert!((0.08..=0.12).contains(&d0), "d0 was {}", d0);
        let d2 = policy.delay_for(2).as_secs_f64();
        assert!((0.32..=0.48).contains(&d2), "d2 was {}", d2);
        let d5 = policy.delay_for(5).as_secs_f64();
        assert!((0.36..=0.54).contains(&d5), "d5 was {}", d5);
    }
}
