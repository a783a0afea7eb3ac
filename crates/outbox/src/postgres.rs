//! PostgreSQL implementation of OutboxStore
//!
//! Table `outbox_events (id bigserial, type, key, date, payload, status, target)`,
//! created by the storage crate's migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, instrument};

use crate::store::*;

/// Row shape of `outbox_events`
#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    #[sqlx(rename = "type")]
    event_type: String,
    #[sqlx(rename = "key")]
    event_key: String,
    date: DateTime<Utc>,
    payload: String,
    status: String,
    target: String,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|reason| StoreError::InvalidRow { id: row.id, reason })?;

        Ok(Self {
            id: row.id,
            event_type: row.event_type,
            event_key: row.event_key,
            date: row.date,
            payload: row.payload,
            status,
            target: row.target,
        })
    }
}

/// Insert a New outbox row on the caller's connection.
///
/// Pass the connection of an open transaction so the row commits or rolls
/// back together with the domain write.
#[instrument(skip(conn, event), fields(event_type = %event.event_type, event_key = %event.event_key))]
pub async fn insert_event(
    conn: &mut PgConnection,
    event: &NewOutboxEvent,
) -> Result<i64, StoreError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO outbox_events (type, key, date, payload, status, target)
        VALUES ($1, $2, now(), $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(&event.event_type)
    .bind(&event.event_key)
    .bind(&event.payload)
    .bind(OutboxStatus::New.as_str())
    .bind(&event.target)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to insert outbox event: {}", e);
        StoreError::Database(e.to_string())
    })?;

    debug!(event_id = id, "outbox event inserted");
    Ok(id)
}

/// PostgreSQL implementation of OutboxStore
///
/// ```ignore
/// use coderunner_outbox::PostgresOutboxStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/coderunner").await?;
/// let store = PostgresOutboxStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self))]
    async fn pending_events_after(
        &self,
        after: Option<OutboxCursor>,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, type, key, date, payload, status, target
            FROM outbox_events
            WHERE status IN ('new', 'failed')
              AND ($1::timestamptz IS NULL OR (date, id) > ($1::timestamptz, $2::bigint))
            ORDER BY date, id
            LIMIT $3
            "#,
        )
        .bind(after.map(|c| c.date))
        .bind(after.map(|c| c.id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to query pending outbox events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.into_iter().map(OutboxEvent::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn mark_sent(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'sent'
            WHERE id = $1 AND status IN ('new', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to mark outbox event sent: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE status = 'sent' AND date <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete sent outbox events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(result.rows_affected())
    }
}
