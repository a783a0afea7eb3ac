//! In-memory implementation of the event bus

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::{BusConfig, BusError, BusMessage, DeliveryReport, EventConsumer, EventProducer, OffsetReset};

/// One appended record
#[derive(Clone)]
struct Record {
    key: String,
    value: Vec<u8>,
    timestamp: DateTime<Utc>,
}

/// (group, topic, partition) -> next offset to read
type OffsetKey = (String, String, u32);

struct BusInner {
    config: BusConfig,
    topics: RwLock<HashMap<String, Vec<Vec<Record>>>>,
    committed: Mutex<HashMap<OffsetKey, u64>>,
    appended: Notify,
    closed: AtomicBool,
}

/// Single-process bus with key partitioning and consumer-group offsets
///
/// Cheap to clone; clones share the same logs.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                topics: RwLock::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                appended: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Partition a key maps to
    pub fn partition_for(&self, key: &str) -> u32 {
        self.inner.config.partition_for(key)
    }

    /// Subscribe to `topic` as the configured consumer group
    pub fn subscribe(&self, topic: &str) -> InMemoryConsumer {
        let group = self.inner.config.consumer_group.clone();
        self.subscribe_as(&group, topic)
    }

    /// Subscribe to `topic` as `group`.
    ///
    /// Reading starts at the group's committed offsets; partitions without one
    /// follow the configured reset policy.
    pub fn subscribe_as(&self, group: &str, topic: &str) -> InMemoryConsumer {
        let partitions = self.inner.config.partitions;
        let topics = self.inner.topics.read();
        let committed = self.inner.committed.lock();

        let positions = (0..partitions)
            .map(|p| {
                let key = (group.to_string(), topic.to_string(), p);
                match committed.get(&key) {
                    Some(offset) => *offset,
                    None => match self.inner.config.offset_reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => topics
                            .get(topic)
                            .and_then(|logs| logs.get(p as usize))
                            .map(|log| log.len() as u64)
                            .unwrap_or(0),
                    },
                }
            })
            .collect();

        debug!(group, topic, "consumer subscribed");

        InMemoryConsumer {
            inner: Arc::clone(&self.inner),
            group: group.to_string(),
            topic: topic.to_string(),
            positions: Mutex::new(positions),
            cursor: Mutex::new(0),
        }
    }

    /// Committed offset of a group on one partition (next offset to read)
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.inner
            .committed
            .lock()
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Number of messages ever appended to `topic`
    pub fn message_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|logs| logs.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Reject further produces and wake every waiting consumer
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.appended.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventProducer for InMemoryBus {
    async fn produce(
        &self,
        topic: &str,
        key: &str,
        value: &[u8],
    ) -> Result<DeliveryReport, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let partition = self.partition_for(key);
        let offset = {
            let mut topics = self.inner.topics.write();
            let logs = topics.entry(topic.to_string()).or_insert_with(|| {
                (0..self.inner.config.partitions)
                    .map(|_| Vec::new())
                    .collect()
            });
            let log = logs
                .get_mut(partition as usize)
                .ok_or_else(|| BusError::Delivery(format!("no partition {}", partition)))?;
            log.push(Record {
                key: key.to_string(),
                value: value.to_vec(),
                timestamp: Utc::now(),
            });
            (log.len() - 1) as u64
        };

        trace!(topic, key, partition, offset, "message appended");
        self.inner.appended.notify_waiters();

        Ok(DeliveryReport { partition, offset })
    }
}

/// Consumer handle for one (group, topic)
pub struct InMemoryConsumer {
    inner: Arc<BusInner>,
    group: String,
    topic: String,
    /// Next offset to fetch, per partition
    positions: Mutex<Vec<u64>>,
    /// Partition to look at first on the next fetch
    cursor: Mutex<usize>,
}

impl InMemoryConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Take the next available message, rotating across partitions
    fn try_fetch(&self) -> Option<BusMessage> {
        let topics = self.inner.topics.read();
        let logs = topics.get(&self.topic)?;
        let mut positions = self.positions.lock();
        let mut cursor = self.cursor.lock();
        let count = positions.len();

        for step in 0..count {
            let partition = (*cursor + step) % count;
            let position = positions[partition];
            let Some(record) = logs
                .get(partition)
                .and_then(|log| log.get(position as usize))
            else {
                continue;
            };

            positions[partition] = position + 1;
            *cursor = (partition + 1) % count;

            return Some(BusMessage {
                topic: self.topic.clone(),
                partition: partition as u32,
                offset: position,
                key: record.key.clone(),
                value: record.value.clone(),
                timestamp: record.timestamp,
            });
        }

        None
    }
}

#[async_trait]
impl EventConsumer for InMemoryConsumer {
    async fn recv(&self) -> Result<BusMessage, BusError> {
        loop {
            let appended = self.inner.appended.notified();
            tokio::pin!(appended);
            // Register interest before checking so an append in between isn't missed
            appended.as_mut().enable();

            if let Some(message) = self.try_fetch() {
                return Ok(message);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(BusError::Closed);
            }

            appended.await;
        }
    }

    async fn commit(&self, message: &BusMessage) -> Result<(), BusError> {
        if message.topic != self.topic {
            return Err(BusError::Commit(format!(
                "message from topic {} committed on consumer for {}",
                message.topic, self.topic
            )));
        }

        let key = (self.group.clone(), self.topic.clone(), message.partition);
        let next = message.offset + 1;
        let mut committed = self.inner.committed.lock();
        let entry = committed.entry(key).or_insert(0);
        if next > *entry {
            *entry = next;
        }

        trace!(
            group = %self.group,
            topic = %self.topic,
            partition = message.partition,
            offset = message.offset,
            "offset committed"
        );
        Ok(())
    }
}
