//! Queue sizing and worker timing.
//!
//! Every wait in the pipeline is bounded by one of these intervals so that
//! flag changes and stop requests are observed promptly.

use std::time::Duration;

use netran_core::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct PipelineConfig {
    /// Maximum batches waiting between capture and accounting.
    #[serde(default = "default_capacity")]
    #[validate(range(min = 1, max = 1000000))]
    pub queue_capacity: usize,

    /// Bounded wait on the queue condition before re-checking (milliseconds).
    #[serde(default = "default_wait_interval")]
    #[validate(range(min = 10, max = 60000))]
    pub wait_interval_ms: u64,

    /// Pause before deactivating the pipeline on stop (milliseconds).
    #[serde(default = "default_grace_delay")]
    #[validate(range(max = 10000))]
    pub grace_delay_ms: u64,

    /// Poll interval while waiting for the queue to drain (milliseconds).
    #[serde(default = "default_drain_poll")]
    #[validate(range(min = 1, max = 10000))]
    pub drain_poll_ms: u64,

    /// Upper bound on waiting for a worker thread to exit (milliseconds).
    #[serde(default = "default_join_timeout")]
    #[validate(range(min = 100, max = 600000))]
    pub join_timeout_ms: u64,

    /// Sleep per iteration under the idle inactive policy (milliseconds).
    #[serde(default = "default_idle_interval")]
    #[validate(range(min = 1, max = 10000))]
    pub idle_interval_ms: u64,
}

fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_wait_interval() -> u64 {
    2000
}

fn default_grace_delay() -> u64 {
    80
}

fn default_drain_poll() -> u64 {
    50
}

fn default_join_timeout() -> u64 {
    10_000
}

fn default_idle_interval() -> u64 {
    50
}

impl PipelineConfig {
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_capacity(),
            wait_interval_ms: default_wait_interval(),
            grace_delay_ms: default_grace_delay(),
            drain_poll_ms: default_drain_poll(),
            join_timeout_ms: default_join_timeout(),
            idle_interval_ms: default_idle_interval(),
        }
    }
}
