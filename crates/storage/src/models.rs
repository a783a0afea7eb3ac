// Database row types

use chrono::{DateTime, Utc};
use coderunner_core::Run;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub code: String,
    pub scheduled_at: DateTime<Utc>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            scheduled_at: row.scheduled_at,
        }
    }
}
