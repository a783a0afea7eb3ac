// Storage backend abstraction
// Decision: Use enum dispatch for simplicity over trait objects
//
// A unified StorageBackend enum that works with either PostgreSQL
// (production) or in-memory (dev mode) storage.

use std::sync::Arc;

use anyhow::Result;
use coderunner_core::Run;
use coderunner_outbox::OutboxStore;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::memory::InMemoryDatabase;
use crate::repositories::Database;

/// Storage settings read at startup
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Postgres URL; `None` selects the in-memory backend
    pub database_url: Option<String>,
    /// Apply embedded migrations after connecting
    pub run_migrations: bool,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            run_migrations: true,
            max_connections: 10,
        }
    }
}

impl StorageConfig {
    /// - `DATABASE_URL`: unset or empty selects dev mode
    /// - `RUN_MIGRATIONS`: "false" to skip migrations
    /// - `DATABASE_MAX_CONNECTIONS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            run_migrations: std::env::var("RUN_MIGRATIONS")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(defaults.run_migrations),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
        }
    }
}

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory database (dev mode)
    InMemory(Arc<InMemoryDatabase>),
}

impl StorageBackend {
    /// Create a PostgreSQL storage backend from a database URL
    pub async fn postgres(database_url: &str) -> Result<Self> {
        let db = Database::from_url(database_url).await?;
        Ok(Self::Postgres(db))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryDatabase::new()))
    }

    /// Pick the backend described by `config`
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        match &config.database_url {
            Some(url) => {
                let db = Database::connect(url, config.max_connections).await?;
                if config.run_migrations {
                    db.migrate().await?;
                }
                info!("Using PostgreSQL storage");
                Ok(Self::Postgres(db))
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory storage (data is lost on restart)");
                Ok(Self::in_memory())
            }
        }
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Short backend name for health output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::InMemory(_) => "memory",
        }
    }

    /// Get the PostgreSQL pool if using PostgreSQL backend
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(db) => Some(db.pool()),
            Self::InMemory(_) => None,
        }
    }

    /// Outbox store over the same storage, for the publisher and janitor
    pub fn outbox_store(&self) -> Arc<dyn OutboxStore> {
        match self {
            Self::Postgres(db) => Arc::new(db.outbox_store()),
            Self::InMemory(db) => db.outbox(),
        }
    }

    // ============================================
    // Runs
    // ============================================

    /// Atomically persist a run and its `run.code` outbox event
    pub async fn schedule_run(&self, code: &str, topic: &str) -> Result<Run> {
        match self {
            Self::Postgres(db) => db.schedule_run(code, topic).await,
            Self::InMemory(db) => db.schedule_run(code, topic).await,
        }
    }

    /// Atomically persist an already built run and its outbox event
    pub async fn insert_run(&self, run: &Run, topic: &str) -> Result<()> {
        match self {
            Self::Postgres(db) => db.insert_run(run, topic).await,
            Self::InMemory(db) => db.insert_run(run, topic).await,
        }
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        match self {
            Self::Postgres(db) => db.get_run(id).await,
            Self::InMemory(db) => db.get_run(id).await,
        }
    }
}
