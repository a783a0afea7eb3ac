//! Coderunner event bus
//!
//! This crate provides:
//! - [`EventProducer`] / [`EventConsumer`] - the seams the outbox publisher and
//!   the execution consumer are written against
//! - [`InMemoryBus`] - a single-process implementation with key partitioning,
//!   consumer groups and committed offsets (dev mode)
//! - [`PostgresBus`] - the same model persisted in Postgres, used with Postgres storage
//! - [`BusBackend`] - enum over both
//! - [`BusConfig`] - backend, partition count, consumer group and offset reset policy
//!
//! # Delivery model
//!
//! ```text
//!  produce(topic, key, value)
//!        │  fnv1a(key) % partitions
//!        ▼
//!  ┌──────────┬──────────┬──────────┐
//!  │ p0 log   │ p1 log   │ p2 log   │   append-only, offsets start at 0
//!  └────┬─────┴────┬─────┴────┬─────┘
//!       ▼          ▼          ▼
//!  consumer group "coderunner": committed offset per partition
//! ```
//!
//! Messages with the same key are delivered in production order. A message
//! that was received but never committed is redelivered to the next consumer
//! that joins the same group, so delivery is at-least-once.
//!
//! # Example
//!
//! ```ignore
//! use coderunner_bus::{BusConfig, EventConsumer, EventProducer, InMemoryBus};
//!
//! let bus = InMemoryBus::new(BusConfig::default());
//! bus.produce("topic", "key", b"hello").await?;
//!
//! let consumer = bus.subscribe("topic");
//! let message = consumer.recv().await?;
//! consumer.commit(&message).await?;
//! ```

mod backend;
mod config;
mod error;
mod memory;
mod postgres;
mod traits;

pub use backend::BusBackend;
pub use config::{BusConfig, BusKind, OffsetReset};
pub use error::BusError;
pub use memory::{InMemoryBus, InMemoryConsumer};
pub use postgres::{PostgresBus, PostgresConsumer};
pub use traits::{BusMessage, DeliveryReport, EventConsumer, EventProducer};
