//! PostgreSQL implementation of the event bus
//!
//! Tables (created by the storage crate's migrations):
//! - `bus_partitions (topic, partition, next_offset)` - offset allocator
//! - `bus_messages (topic, partition, offset, key, value, timestamp)` - append-only logs
//! - `bus_offsets (group_name, topic, partition, committed)` - next offset to read
//!
//! Offsets are allocated by upserting the partition row inside the append
//! transaction. The row lock serializes producers per partition, so a higher
//! offset never becomes visible before a lower one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, instrument, trace};

use crate::{BusConfig, BusError, BusMessage, DeliveryReport, EventConsumer, EventProducer, OffsetReset};

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    partition: i32,
    offset: i64,
    key: String,
    value: Vec<u8>,
    timestamp: DateTime<Utc>,
}

struct PgBusInner {
    pool: PgPool,
    config: BusConfig,
    /// Wakes consumers of this process right after a local append
    appended: Notify,
    closed: AtomicBool,
}

/// Durable bus backed by Postgres tables
///
/// Cheap to clone; clones share the pool. Messages and committed offsets
/// survive restarts, so a row the outbox marked Sent is still delivered.
///
/// ```ignore
/// use coderunner_bus::{BusConfig, PostgresBus};
///
/// let bus = PostgresBus::new(pool, BusConfig::from_env());
/// let consumer = bus.subscribe("coderunner_outbox_events");
/// ```
#[derive(Clone)]
pub struct PostgresBus {
    inner: Arc<PgBusInner>,
}

impl PostgresBus {
    pub fn new(pool: PgPool, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(PgBusInner {
                pool,
                config,
                appended: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Subscribe to `topic` as the configured consumer group
    pub fn subscribe(&self, topic: &str) -> PostgresConsumer {
        let group = self.inner.config.consumer_group.clone();
        self.subscribe_as(&group, topic)
    }

    /// Subscribe to `topic` as `group`. Positions are loaded on the first `recv`.
    pub fn subscribe_as(&self, group: &str, topic: &str) -> PostgresConsumer {
        debug!(group, topic, "consumer subscribed");
        PostgresConsumer {
            inner: Arc::clone(&self.inner),
            group: group.to_string(),
            topic: topic.to_string(),
            positions: Mutex::new(None),
            cursor: Mutex::new(0),
        }
    }

    /// Committed offset of a group on one partition (next offset to read)
    pub async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>, BusError> {
        let committed: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT committed
            FROM bus_offsets
            WHERE group_name = $1 AND topic = $2 AND partition = $3
            "#,
        )
        .bind(group)
        .bind(topic)
        .bind(partition as i32)
        .fetch_optional(&self.inner.pool)
        .await
        .map_err(|e| BusError::Fetch(e.to_string()))?;

        Ok(committed.map(|c| c as u64))
    }

    /// Reject further produces and wake every waiting consumer of this process
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.appended.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventProducer for PostgresBus {
    #[instrument(skip(self, value), fields(value_len = value.len()))]
    async fn produce(
        &self,
        topic: &str,
        key: &str,
        value: &[u8],
    ) -> Result<DeliveryReport, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let partition = self.inner.config.partition_for(key);
        let delivery = |e: sqlx::Error| {
            error!("Failed to append bus message: {}", e);
            BusError::Delivery(e.to_string())
        };

        let mut tx = self.inner.pool.begin().await.map_err(delivery)?;

        let offset: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO bus_partitions (topic, partition, next_offset)
            VALUES ($1, $2, 1)
            ON CONFLICT (topic, partition)
            DO UPDATE SET next_offset = bus_partitions.next_offset + 1
            RETURNING next_offset - 1
            "#,
        )
        .bind(topic)
        .bind(partition as i32)
        .fetch_one(&mut *tx)
        .await
        .map_err(delivery)?;

        sqlx::query(
            r#"
            INSERT INTO bus_messages (topic, partition, "offset", key, value, timestamp)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(topic)
        .bind(partition as i32)
        .bind(offset)
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(delivery)?;

        tx.commit().await.map_err(delivery)?;

        trace!(topic, key, partition, offset, "message appended");
        self.inner.appended.notify_waiters();

        Ok(DeliveryReport {
            partition,
            offset: offset as u64,
        })
    }
}

/// Consumer handle for one (group, topic) on the Postgres bus
pub struct PostgresConsumer {
    inner: Arc<PgBusInner>,
    group: String,
    topic: String,
    /// Next offset to fetch, per partition; loaded lazily
    positions: Mutex<Option<Vec<u64>>>,
    /// Partition to look at first on the next fetch
    cursor: Mutex<usize>,
}

impl PostgresConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Committed offsets, with the reset policy for partitions that have none
    async fn load_positions(&self) -> Result<Vec<u64>, BusError> {
        let partitions = self.inner.config.partitions;
        let fetch = |e: sqlx::Error| BusError::Fetch(e.to_string());

        let committed: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT partition, committed
            FROM bus_offsets
            WHERE group_name = $1 AND topic = $2
            "#,
        )
        .bind(&self.group)
        .bind(&self.topic)
        .fetch_all(&self.inner.pool)
        .await
        .map_err(fetch)?;

        let heads: Vec<(i32, i64)> = match self.inner.config.offset_reset {
            OffsetReset::Earliest => Vec::new(),
            OffsetReset::Latest => sqlx::query_as(
                r#"
                SELECT partition, next_offset
                FROM bus_partitions
                WHERE topic = $1
                "#,
            )
            .bind(&self.topic)
            .fetch_all(&self.inner.pool)
            .await
            .map_err(fetch)?,
        };

        let lookup = |rows: &[(i32, i64)], p: u32| {
            rows.iter()
                .find(|(partition, _)| *partition as u32 == p)
                .map(|(_, offset)| *offset as u64)
        };

        Ok((0..partitions)
            .map(|p| {
                lookup(&committed, p)
                    .or_else(|| lookup(&heads, p))
                    .unwrap_or(0)
            })
            .collect())
    }

    /// Take the next available message, rotating across partitions
    async fn try_fetch(&self) -> Result<Option<BusMessage>, BusError> {
        let mut positions = self.positions.lock().await;
        if positions.is_none() {
            *positions = Some(self.load_positions().await?);
        }
        let Some(positions) = positions.as_mut() else {
            return Ok(None);
        };

        let mut cursor = self.cursor.lock().await;
        let count = positions.len();

        for step in 0..count {
            let partition = (*cursor + step) % count;
            let row: Option<MessageRow> = sqlx::query_as(
                r#"
                SELECT partition, "offset", key, value, timestamp
                FROM bus_messages
                WHERE topic = $1 AND partition = $2 AND "offset" >= $3
                ORDER BY "offset"
                LIMIT 1
                "#,
            )
            .bind(&self.topic)
            .bind(partition as i32)
            .bind(positions[partition] as i64)
            .fetch_optional(&self.inner.pool)
            .await
            .map_err(|e| BusError::Fetch(e.to_string()))?;

            let Some(row) = row else {
                continue;
            };

            positions[partition] = row.offset as u64 + 1;
            *cursor = (partition + 1) % count;

            return Ok(Some(BusMessage {
                topic: self.topic.clone(),
                partition: row.partition as u32,
                offset: row.offset as u64,
                key: row.key,
                value: row.value,
                timestamp: row.timestamp,
            }));
        }

        Ok(None)
    }
}

#[async_trait]
impl EventConsumer for PostgresConsumer {
    async fn recv(&self) -> Result<BusMessage, BusError> {
        loop {
            let appended = self.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(message) = self.try_fetch().await? {
                return Ok(message);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(BusError::Closed);
            }

            // Other processes append without waking us
            tokio::select! {
                _ = appended => {}
                _ = tokio::time::sleep(self.inner.config.poll_interval()) => {}
            }
        }
    }

    async fn commit(&self, message: &BusMessage) -> Result<(), BusError> {
        if message.topic != self.topic {
            return Err(BusError::Commit(format!(
                "message from topic {} committed on consumer for {}",
                message.topic, self.topic
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO bus_offsets (group_name, topic, partition, committed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_name, topic, partition)
            DO UPDATE SET committed = GREATEST(bus_offsets.committed, EXCLUDED.committed)
            "#,
        )
        .bind(&self.group)
        .bind(&self.topic)
        .bind(message.partition as i32)
        .bind((message.offset + 1) as i64)
        .execute(&self.inner.pool)
        .await
        .map_err(|e| BusError::Commit(e.to_string()))?;

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
