//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the approval engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many times a decision is re-read and re-applied after losing
    /// an optimistic-concurrency race
    #[serde(default = "default_max_decision_retries")]
    pub max_decision_retries: u32,

    /// Notification outbox configuration
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_decision_retries: default_max_decision_retries(),
            notification: NotificationConfig::default(),
        }
    }
}

/// Notification outbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Per-push timeout in milliseconds
    #[serde(default = "default_push_timeout")]
    pub push_timeout_ms: u64,

    /// Attempts before a snapshot is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Background flush interval in milliseconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Queued snapshots kept before the oldest is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl NotificationConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            push_timeout_ms: default_push_timeout(),
            max_attempts: default_max_attempts(),
            flush_interval_ms: default_flush_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// Default value helpers
fn default_max_decision_retries() -> u32 {
    5
}

fn default_push_timeout() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_flush_interval() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    10_000
}
