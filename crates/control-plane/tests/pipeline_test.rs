// End-to-end pipeline tests
//
// schedule -> outbox -> publisher -> bus -> consumer -> executor -> session,
// all in-process with in-memory storage and a scripted container runtime.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coderunner_bus::{BusBackend, BusConfig};
use coderunner_control_plane::Coderunner;
use coderunner_core::{OutboundChannel, RecordingChannel, Run};
use coderunner_outbox::{OutboxConfig, OutboxStatus};
use coderunner_storage::StorageBackend;
use coderunner_worker::sandbox::{ContainerOutput, ContainerSpec, SandboxError};
use coderunner_worker::{ConsumerConfig, ContainerRuntime, SandboxConfig};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

struct ScriptedRuntime {
    outputs: Mutex<VecDeque<ContainerOutput>>,
}

impl ScriptedRuntime {
    fn new(outputs: Vec<ContainerOutput>) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs.into()),
        })
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn run(
        &self,
        _spec: &ContainerSpec,
        _cancel: &CancellationToken,
    ) -> Result<ContainerOutput, SandboxError> {
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SandboxError::Spawn("no scripted output left".to_string()))
    }
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

struct Fixture {
    _dir: tempfile::TempDir,
    coderunner: Coderunner,
    shutdown: watch::Sender<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

fn start(outputs: Vec<ContainerOutput>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let coderunner = Coderunner::new(
        StorageBackend::in_memory(),
        BusBackend::in_memory(BusConfig::default()),
        ScriptedRuntime::new(outputs),
        SandboxConfig::default().with_work_dir(dir.path()),
        OutboxConfig::default().with_poll_interval(Duration::from_millis(20)),
        ConsumerConfig::default(),
    );

    let (shutdown, rx) = watch::channel(false);
    let handles = coderunner.spawn_background(rx);
    coderunner.warmup.mark_ready();

    Fixture {
        _dir: dir,
        coderunner,
        shutdown,
        handles,
    }
}

impl Fixture {
    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.coderunner.bus.close();
        for handle in self.handles {
            handle.await.unwrap();
        }
    }
}

async fn wait_for_frames(channel: &RecordingChannel, count: usize) -> Vec<Value> {
    for _ in 0..200 {
        let frames = channel.json_frames();
        if frames.len() >= count {
            return frames;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    channel.json_frames()
}

#[test_log::test(tokio::test)]
async fn test_successful_run_streams_progress() {
    let fixture = start(vec![
        ContainerOutput::exited(0, lines(&["Build succeeded."]), vec![]),
        ContainerOutput::exited(0, lines(&["Hello, World!"]), vec![]),
    ]);
    let channel = Arc::new(RecordingChannel::new());

    let run = Run::new("Console.WriteLine(\"Hello, World!\");");
    let outbound: Arc<dyn OutboundChannel> = channel.clone();
    assert!(fixture
        .coderunner
        .sessions
        .register(run.id, outbound, CancellationToken::new()));
    let run = fixture.coderunner.runs.schedule_run(run).await.unwrap();

    let frames = wait_for_frames(&channel, 3).await;
    assert_eq!(
        frames,
        vec![
            json!({"action": "build", "result": "launched"}),
            json!({"action": "build", "result": "succeeded"}),
            json!({"action": "run", "result": "succeeded", "outputLines": ["Hello, World!"]}),
        ]
    );

    // Executor releases the session once the run finished
    for _ in 0..100 {
        if !fixture.coderunner.sessions.contains(run.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!fixture.coderunner.sessions.contains(run.id));

    // The outbox row was published exactly once and is now Sent
    let StorageBackend::InMemory(db) = &fixture.coderunner.storage else {
        panic!("expected in-memory storage");
    };
    let events = db.outbox().all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, OutboxStatus::Sent);
    let BusBackend::InMemory(bus) = &fixture.coderunner.bus else {
        panic!("expected in-memory bus");
    };
    assert_eq!(bus.message_count(&events[0].target), 1);

    fixture.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_compile_error_stops_after_build() {
    let fixture = start(vec![ContainerOutput::exited(
        1,
        vec![],
        lines(&["Program.cs(1,18): error CS1002: ; expected"]),
    )]);
    let channel = Arc::new(RecordingChannel::new());

    let run = Run::new("Console.WriteLine(1)");
    let outbound: Arc<dyn OutboundChannel> = channel.clone();
    fixture
        .coderunner
        .sessions
        .register(run.id, outbound, CancellationToken::new());
    fixture.coderunner.runs.schedule_run(run).await.unwrap();

    let frames = wait_for_frames(&channel, 2).await;
    assert_eq!(
        frames,
        vec![
            json!({"action": "build", "result": "launched"}),
            json!({
                "action": "build",
                "result": "aborted",
                "errorLines": ["Program.cs(1,18): error CS1002: ; expected"]
            }),
        ]
    );

    // Nothing after the aborted build
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(channel.frames().len(), 2);

    fixture.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_run_without_session_still_executes() {
    let fixture = start(vec![
        ContainerOutput::exited(0, lines(&["Build succeeded."]), vec![]),
        ContainerOutput::exited(0, lines(&["quiet"]), vec![]),
    ]);

    let run = fixture.coderunner.runs.schedule("x").await.unwrap();

    let StorageBackend::InMemory(db) = &fixture.coderunner.storage else {
        panic!("expected in-memory storage");
    };
    for _ in 0..200 {
        if db.outbox().all().iter().all(|e| e.status == OutboxStatus::Sent) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(db
        .outbox()
        .all()
        .iter()
        .all(|e| e.status == OutboxStatus::Sent && e.event_key == run.id.to_string()));

    fixture.stop().await;
}
