use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Tunables for the delivery loop, all defaulted and all overridable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// How often an idle worker wakes to poll.
    pub poll_interval: Duration,
    /// Maximum events claimed per cycle.
    pub batch_size: usize,
    /// How long a claim is owned before other workers may reclaim it.
    pub lease: Duration,
    /// Backoff floor (delay before the first retry).
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Attempts before an event is dead-lettered.
    pub max_attempts: u32,
    /// Jitter fraction applied to backoff delays.
    pub jitter: f64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        OutboxConfig {
            poll_interval: Duration::from_secs(10),
            batch_size: 100,
            lease: Duration::from_secs(60),
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(10 * 60),
            max_attempts: 8,
            jitter: 0.2,
        }
    }
}

impl OutboxConfig {
    /// The retry policy slice of this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            max_attempts: self.max_attempts,
            jitter: self.jitter,
        }
    }
}
