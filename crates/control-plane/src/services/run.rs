// Run service

use anyhow::{bail, Result};
use coderunner_core::Run;
use coderunner_storage::StorageBackend;
use tracing::Instrument;
use uuid::Uuid;

pub struct RunService {
    storage: StorageBackend,
    topic: String,
}

impl RunService {
    pub fn new(storage: StorageBackend, topic: impl Into<String>) -> Self {
        Self {
            storage,
            topic: topic.into(),
        }
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    /// Persist a new run for `code` and its outbox event in one transaction
    pub async fn schedule(&self, code: &str) -> Result<Run> {
        self.schedule_run(Run::new(code)).await
    }

    /// Like [`RunService::schedule`] for a run whose id the caller already uses,
    /// e.g. to register a live session before the outbox row becomes visible
    pub async fn schedule_run(&self, run: Run) -> Result<Run> {
        if run.code.trim().is_empty() {
            bail!("code must not be empty");
        }

        let span = tracing::info_span!(
            "schedule_run",
            "otel.kind" = "internal",
            topic = %self.topic,
            code_len = run.code.len(),
            run_id = %run.id,
        );

        async {
            self.storage.insert_run(&run, &self.topic).await?;
            tracing::info!(run_id = %run.id, "Run scheduled");
            Ok::<_, anyhow::Error>(run)
        }
        .instrument(span)
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Run>> {
        self.storage.get_run(id).await
    }
}
