//! Bus configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where a consumer group without a committed offset starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetReset {
    /// From the first retained message
    Earliest,
    /// Only messages produced after subscribing
    Latest,
}

impl std::str::FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!("unknown offset reset policy: {}", other)),
        }
    }
}

/// Which bus implementation carries the messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    /// Process-local logs, lost on restart (dev mode)
    Memory,
    /// Logs and committed offsets in Postgres tables
    Postgres,
}

impl BusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        }
    }
}

impl std::str::FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(format!("unknown bus backend: {}", other)),
        }
    }
}

/// Bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Explicit backend; `None` follows the storage backend
    pub backend: Option<BusKind>,

    /// Partitions per topic
    pub partitions: u32,

    /// Consumer group used by [`crate::InMemoryBus::subscribe`]
    pub consumer_group: String,

    /// Start position for groups without a committed offset
    pub offset_reset: OffsetReset,

    /// How often a Postgres consumer polls for messages from other processes
    pub poll_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: None,
            partitions: 4,
            consumer_group: "coderunner".to_string(),
            offset_reset: OffsetReset::Earliest,
            poll_interval_ms: 250,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables
    ///
    /// - `BUS_BACKEND` ("memory" or "postgres", default: same as storage)
    /// - `BUS_PARTITIONS` (default 4)
    /// - `BUS_CONSUMER_GROUP` (default "coderunner")
    /// - `BUS_OFFSET_RESET` (default "earliest")
    /// - `BUS_POLL_INTERVAL_MS` (default 250)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: std::env::var("BUS_BACKEND")
                .ok()
                .and_then(|v| v.parse().ok()),
            partitions: std::env::var("BUS_PARTITIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.partitions)
                .max(1),
            consumer_group: std::env::var("BUS_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            offset_reset: std::env::var("BUS_OFFSET_RESET")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.offset_reset),
            poll_interval_ms: std::env::var("BUS_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_ms)
                .max(1),
        }
    }

    pub fn with_backend(mut self, backend: BusKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the partition count (at least 1)
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.offset_reset = reset;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Partition `key` maps to. Stable across processes and restarts.
    pub fn partition_for(&self, key: &str) -> u32 {
        (fnv1a(key.as_bytes()) % u64::from(self.partitions.max(1))) as u32
    }
}

/// 64-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert_eq!(config.partitions, 4);
        assert_eq!(config.consumer_group, "coderunner");
        assert_eq!(config.offset_reset, OffsetReset::Earliest);
        assert_eq!(config.backend, None);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("Postgres".parse::<BusKind>(), Ok(BusKind::Postgres));
        assert_eq!("memory".parse::<BusKind>(), Ok(BusKind::Memory));
        assert!("kafka".parse::<BusKind>().is_err());
    }

    #[test]
    fn test_partition_is_stable() {
        let config = BusConfig::default();
        // FNV-1a of "" is the offset basis
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(config.partition_for("run-1"), config.partition_for("run-1"));
        assert_eq!(
            BusConfig::default().with_partitions(1).partition_for("anything"),
            0
        );
    }

    #[test]
    fn test_builder_clamps_partitions() {
        let config = BusConfig::default().with_partitions(0);
        assert_eq!(config.partitions, 1);
    }

    #[test]
    fn test_offset_reset_parse() {
        assert_eq!("EARLIEST".parse::<OffsetReset>(), Ok(OffsetReset::Earliest));
        assert_eq!("latest".parse::<OffsetReset>(), Ok(OffsetReset::Latest));
        assert!("middle".parse::<OffsetReset>().is_err());
    }
}
