//! Producer and consumer traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::BusError;

/// A message read from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement returned once a message is durably appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub partition: u32,
    pub offset: u64,
}

/// Publishes keyed messages
#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Append `value` to `topic`. Resolves once the bus acknowledged the write.
    async fn produce(&self, topic: &str, key: &str, value: &[u8])
        -> Result<DeliveryReport, BusError>;
}

/// Reads messages for one consumer group and topic
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Wait for the next message
    async fn recv(&self) -> Result<BusMessage, BusError>;

    /// Mark `message` (and everything before it on its partition) as processed
    async fn commit(&self, message: &BusMessage) -> Result<(), BusError>;
}
