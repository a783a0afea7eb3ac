//! Transactional outbox
//!
//! This crate provides:
//! - [`OutboxStore`] - read/update side used by the background loops
//! - [`postgres::insert_event`] / [`InMemoryOutboxStore::insert`] - inserts
//!   that join the caller's transaction
//! - [`OutboxPublisher`] - drains pending rows to the bus every 2s
//! - [`OutboxJanitor`] - purges Sent rows older than 7 days every 60s
//!
//! # Example
//!
//! ```ignore
//! use coderunner_outbox::{OutboxConfig, OutboxJanitor, OutboxPublisher};
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let config = OutboxConfig::from_env();
//!
//! tokio::spawn(OutboxPublisher::new(store.clone(), producer, config.clone()).run(shutdown_rx.clone()));
//! tokio::spawn(OutboxJanitor::new(store, config).run(shutdown_rx));
//!
//! // Graceful shutdown
//! shutdown_tx.send(true)?;
//! ```

mod config;
mod janitor;
mod memory;
pub mod postgres;
mod publisher;
mod store;

pub use config::OutboxConfig;
pub use janitor::OutboxJanitor;
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use publisher::{OutboxPublisher, PublishReport};
pub use store::{NewOutboxEvent, OutboxCursor, OutboxEvent, OutboxStatus, OutboxStore, StoreError};
