//! OutboxStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coderunner_core::DomainEvent;
use serde::{Deserialize, Serialize};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored value could not be interpreted
    #[error("invalid row {id}: {reason}")]
    InvalidRow { id: i64, reason: String },
}

/// Delivery status of an outbox row
///
/// Transitions are New -> Sent and Failed -> Sent only. Nothing in the
/// publish path writes Failed; it is honoured when set externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    New,
    Failed,
    Sent,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Failed => "failed",
            Self::Sent => "sent",
        }
    }

    /// Whether the publisher should pick the row up
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::New | Self::Failed)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "failed" => Ok(Self::Failed),
            "sent" => Ok(Self::Sent),
            other => Err(format!("unknown outbox status: {}", other)),
        }
    }
}

/// A persisted outbox row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    /// Store-assigned, monotonically increasing
    pub id: i64,
    pub event_type: String,
    /// Bus message key (the run id)
    pub event_key: String,
    pub date: DateTime<Utc>,
    /// Serialized [`DomainEvent`]
    pub payload: String,
    pub status: OutboxStatus,
    /// Destination topic
    pub target: String,
}

impl OutboxEvent {
    /// Position of this row in publish order
    pub fn cursor(&self) -> OutboxCursor {
        OutboxCursor {
            date: self.date,
            id: self.id,
        }
    }
}

/// A `(date, id)` position in publish order, used to page through pending rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutboxCursor {
    pub date: DateTime<Utc>,
    pub id: i64,
}

/// An outbox row to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub event_type: String,
    pub event_key: String,
    pub payload: String,
    pub target: String,
}

impl NewOutboxEvent {
    /// Build a row for `event` addressed to `topic`
    pub fn from_domain(event: &DomainEvent, topic: impl Into<String>) -> Result<Self, StoreError> {
        let payload = event
            .to_payload()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Self {
            event_type: event.event_type().to_string(),
            event_key: event.event_key(),
            payload,
            target: topic.into(),
        })
    }
}

/// Read/update side of the outbox used by the publisher and janitor
///
/// Inserts are not part of this trait: they must share the caller's
/// transaction (see [`crate::postgres::insert_event`] and
/// [`crate::InMemoryOutboxStore::insert`]).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Rows with status New or Failed ordered by (date, id), at most `limit`
    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        self.pending_events_after(None, limit).await
    }

    /// Like [`OutboxStore::pending_events`], restricted to rows strictly after `after`
    async fn pending_events_after(
        &self,
        after: Option<OutboxCursor>,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Mark one row Sent. Returns false if the row is missing or already Sent.
    async fn mark_sent(&self, id: i64) -> Result<bool, StoreError>;

    /// Delete Sent rows dated at or before `cutoff`. Returns the number deleted.
    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
