// Repository layer for database operations

use std::time::Duration;

use anyhow::{Context, Result};
use coderunner_core::{DomainEvent, Run};
use coderunner_outbox::{postgres::insert_event, NewOutboxEvent, PostgresOutboxStore};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::RunRow;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 10).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Outbox store sharing this pool
    pub fn outbox_store(&self) -> PostgresOutboxStore {
        PostgresOutboxStore::new(self.pool.clone())
    }

    // ============================================
    // Runs
    // ============================================

    /// Insert a fresh run for `code` and its `run.code` outbox row in one transaction
    pub async fn schedule_run(&self, code: &str, topic: &str) -> Result<Run> {
        let run = Run::new(code);
        self.insert_run(&run, topic).await?;
        Ok(run)
    }

    /// Insert `run` and its `run.code` outbox row in one transaction
    pub async fn insert_run(&self, run: &Run, topic: &str) -> Result<()> {
        let event = NewOutboxEvent::from_domain(&DomainEvent::run_code(run.id), topic)?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO coderuns (id, code, scheduled_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(run.id)
        .bind(&run.code)
        .bind(run.scheduled_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert run")?;

        let event_id = insert_event(&mut *tx, &event).await?;

        tx.commit().await.context("Failed to commit schedule transaction")?;

        debug!(run_id = %run.id, event_id, "run scheduled");
        Ok(())
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, code, scheduled_at
            FROM coderuns
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load run")?;

        Ok(row.map(Run::from))
    }
}
