//! Outbox loop configuration

use std::time::Duration;

use coderunner_core::DEFAULT_TOPIC;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Publisher and janitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Topic new outbox rows are addressed to
    pub topic: String,

    /// Delay between publisher polls
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// How long one produce may wait for the bus acknowledgement
    #[serde(with = "duration_millis")]
    pub ack_timeout: Duration,

    /// Rows fetched per page; a poll walks every page
    pub batch_size: i64,

    /// Delay between janitor sweeps
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,

    /// Age after which Sent rows are purged
    #[serde(with = "duration_millis")]
    pub retention: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            poll_interval: Duration::from_millis(2000),
            ack_timeout: Duration::from_millis(3000),
            batch_size: 100,
            cleanup_interval: Duration::from_secs(60),
            retention: Duration::from_secs(7 * SECS_PER_DAY),
        }
    }
}

impl OutboxConfig {
    /// Create configuration from environment variables
    ///
    /// - `OUTBOX_TOPIC`
    /// - `OUTBOX_POLL_INTERVAL_MS`
    /// - `OUTBOX_ACK_TIMEOUT_MS`
    /// - `OUTBOX_BATCH_SIZE`
    /// - `OUTBOX_CLEANUP_INTERVAL_SECS`
    /// - `OUTBOX_RETENTION_DAYS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            topic: std::env::var("OUTBOX_TOPIC").unwrap_or(defaults.topic),
            poll_interval: env_u64("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            ack_timeout: env_u64("OUTBOX_ACK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ack_timeout),
            batch_size: env_u64("OUTBOX_BATCH_SIZE")
                .map(|v| v.max(1) as i64)
                .unwrap_or(defaults.batch_size),
            cleanup_interval: env_u64("OUTBOX_CLEANUP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            retention: env_u64("OUTBOX_RETENTION_DAYS")
                .map(|days| retention_from_days(days, defaults.retention))
                .unwrap_or(defaults.retention),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// `days` as a Duration, or `fallback` when it does not fit
fn retention_from_days(days: u64, fallback: Duration) -> Duration {
    match days.checked_mul(SECS_PER_DAY) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            warn!(days, "OUTBOX_RETENTION_DAYS out of range, using default retention");
            fallback
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
