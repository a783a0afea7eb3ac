// In-memory storage implementation for dev mode
// Decision: Use parking_lot for thread-safe access
//
// Runs live in a HashMap; outbox rows live in an InMemoryOutboxStore shared
// with the publisher and janitor, so dev mode exercises the same loops.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use coderunner_core::{DomainEvent, Run};
use coderunner_outbox::{InMemoryOutboxStore, NewOutboxEvent};
use parking_lot::RwLock;
use uuid::Uuid;

/// In-memory database for dev mode
/// All data is stored in memory and lost on restart
#[derive(Default)]
pub struct InMemoryDatabase {
    runs: RwLock<HashMap<Uuid, Run>>,
    outbox: Arc<InMemoryOutboxStore>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> Arc<InMemoryOutboxStore> {
        Arc::clone(&self.outbox)
    }

    // ============================================
    // Runs
    // ============================================

    pub async fn schedule_run(&self, code: &str, topic: &str) -> Result<Run> {
        let run = Run::new(code);
        self.insert_run(&run, topic).await?;
        Ok(run)
    }

    pub async fn insert_run(&self, run: &Run, topic: &str) -> Result<()> {
        // Everything fallible happens before either write
        let event = NewOutboxEvent::from_domain(&DomainEvent::run_code(run.id), topic)?;

        let mut runs = self.runs.write();
        if runs.contains_key(&run.id) {
            bail!("run {} already exists", run.id);
        }
        runs.insert(run.id, run.clone());
        self.outbox.insert(event);
        Ok(())
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.runs.read().get(&id).cloned())
    }

    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderunner_outbox::OutboxStatus;

    #[tokio::test]
    async fn test_schedule_writes_run_and_event() {
        let db = InMemoryDatabase::new();
        let run = db.schedule_run("print(1)", "topic").await.unwrap();

        assert_eq!(db.get_run(run.id).await.unwrap(), Some(run.clone()));

        let events = db.outbox().all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_key, run.id.to_string());
        assert_eq!(events[0].event_type, "run.code");
        assert_eq!(events[0].status, OutboxStatus::New);
        assert_eq!(events[0].target, "topic");
    }

    #[tokio::test]
    async fn test_insert_run_keeps_given_id_and_rejects_duplicates() {
        let db = InMemoryDatabase::new();
        let run = Run::new("print(2)");

        db.insert_run(&run, "topic").await.unwrap();
        assert_eq!(db.get_run(run.id).await.unwrap(), Some(run.clone()));

        assert!(db.insert_run(&run, "topic").await.is_err());
        assert_eq!(db.outbox().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_run() {
        let db = InMemoryDatabase::new();
        assert!(db.get_run(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_every_run_has_exactly_one_event() {
        let db = Arc::new(InMemoryDatabase::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.schedule_run(&format!("code {}", i), "topic").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(db.run_count(), 20);
        assert_eq!(db.outbox().len(), 20);
    }
}
