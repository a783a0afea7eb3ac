// Run handler
//
// run.code events carry only the run id. The handler loads the run and hands
// it to the sandbox executor. A missing run is not an error: it may have been
// written by a different database or removed by an operator.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use coderunner_core::DomainEvent;
use coderunner_storage::StorageBackend;
use tracing::{info, warn};

use crate::consumer::MessageHandler;
use crate::sandbox::SandboxExecutor;

pub struct RunCodeHandler {
    storage: StorageBackend,
    executor: Arc<SandboxExecutor>,
}

impl RunCodeHandler {
    pub fn new(storage: StorageBackend, executor: Arc<SandboxExecutor>) -> Self {
        Self { storage, executor }
    }
}

#[async_trait]
impl MessageHandler for RunCodeHandler {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        match event {
            DomainEvent::RunCode(payload) => {
                let run_id = payload.code_run_id;
                let Some(run) = self
                    .storage
                    .get_run(run_id)
                    .await
                    .with_context(|| format!("failed to load run {}", run_id))?
                else {
                    warn!(%run_id, "Run not found, skipping");
                    return Ok(());
                };

                info!(%run_id, "Executing run");
                self.executor.execute(&run).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{
        ContainerOutput, ContainerRuntime, ContainerSpec, SandboxConfig, SandboxError,
    };
    use coderunner_core::{RecordingChannel, SessionRegistry, DEFAULT_TOPIC};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingRuntime {
        images: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerRuntime for CountingRuntime {
        async fn run(
            &self,
            spec: &ContainerSpec,
            _cancel: &CancellationToken,
        ) -> Result<ContainerOutput, SandboxError> {
            self.images.lock().push(spec.image.clone());
            Ok(ContainerOutput::exited(
                0,
                vec!["Build succeeded.".to_string()],
                vec![],
            ))
        }
    }

    fn handler(
        storage: StorageBackend,
        sessions: SessionRegistry,
        runtime: Arc<CountingRuntime>,
        dir: &tempfile::TempDir,
    ) -> RunCodeHandler {
        let executor = SandboxExecutor::new(
            runtime,
            sessions,
            SandboxConfig::default().with_work_dir(dir.path()),
        );
        RunCodeHandler::new(storage, Arc::new(executor))
    }

    #[tokio::test]
    async fn test_missing_run_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(CountingRuntime::default());
        let handler = handler(
            StorageBackend::in_memory(),
            SessionRegistry::new(),
            runtime.clone(),
            &dir,
        );

        handler
            .handle(&DomainEvent::run_code(Uuid::now_v7()))
            .await
            .unwrap();

        assert!(runtime.images.lock().is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_run_is_executed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::in_memory();
        let sessions = SessionRegistry::new();
        let channel = Arc::new(RecordingChannel::new());
        let runtime = Arc::new(CountingRuntime::default());

        let run = storage
            .schedule_run("Console.WriteLine(1);", DEFAULT_TOPIC)
            .await
            .unwrap();
        sessions.register(run.id, channel.clone(), CancellationToken::new());

        let handler = handler(storage, sessions.clone(), runtime.clone(), &dir);
        handler.handle(&DomainEvent::run_code(run.id)).await.unwrap();

        assert_eq!(runtime.images.lock().len(), 2);
        assert_eq!(
            channel.json_frames().last().unwrap(),
            &json!({"action": "run", "result": "succeeded", "outputLines": ["Build succeeded."]})
        );
        assert!(!sessions.contains(run.id));
    }
}
