// Live runner WebSocket
// Decision: Each accepted run gets a child of the connection token, so a disconnect
//           cancels every run the connection started
// Decision: The session is registered before the run is persisted; no frame can precede it
// Decision: Once every run started on the connection has completed, the server closes it
// Decision: A null or unparseable frame ends the connection; unknown commands only warn
//
// Client -> server: {"command": "run", "code": "..."}
// Server -> client: RunNotification frames for every run started on this connection,
//                   then a Close frame after the last run completed

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use coderunner_core::{ChannelError, OutboundChannel, Run, SessionRegistry};
use futures::stream::{FuturesUnordered, SplitSink};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::RunService;

/// App state for the runner socket
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RunService>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(service: Arc<RunService>, sessions: SessionRegistry) -> Self {
        Self { service, sessions }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/runner", get(runner_socket))
        .with_state(state)
}

/// Frame sent by the client
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientCommand {
    pub command: Option<String>,
    pub code: Option<String>,
}

/// What to do with one inbound text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Run(String),
    MissingCode,
    Unknown(Option<String>),
    /// `null` or not a command object
    Terminate,
}

pub fn parse_frame(text: &str) -> Inbound {
    match serde_json::from_str::<Option<ClientCommand>>(text) {
        Ok(Some(cmd)) => match cmd.command.as_deref() {
            Some("run") => match cmd.code {
                Some(code) => Inbound::Run(code),
                None => Inbound::MissingCode,
            },
            _ => Inbound::Unknown(cmd.command),
        },
        Ok(None) | Err(_) => Inbound::Terminate,
    }
}

/// GET /runner - upgrade to the live runner protocol
pub async fn runner_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Outbound half of a runner socket
pub struct WsChannel {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsChannel {
    /// Send a Close frame; later writes fail
    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.send(Message::Close(None)).await {
            debug!(error = %e, "Failed to close runner socket");
        }
    }
}

#[async_trait]
impl OutboundChannel for WsChannel {
    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }
}

enum SocketEvent {
    Frame(Option<Result<Message, axum::Error>>),
    RunCompleted,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let channel = Arc::new(WsChannel {
        sink: Mutex::new(sink),
    });
    let connection = CancellationToken::new();
    let mut runs = FuturesUnordered::new();

    info!("Runner socket connected");

    loop {
        let event = tokio::select! {
            frame = stream.next() => SocketEvent::Frame(frame),
            Some(()) = runs.next(), if !runs.is_empty() => SocketEvent::RunCompleted,
        };

        let frame = match event {
            SocketEvent::RunCompleted => {
                if runs.is_empty() {
                    info!("All runs completed, closing runner socket");
                    channel.close().await;
                    break;
                }
                continue;
            }
            SocketEvent::Frame(None) => break,
            SocketEvent::Frame(Some(frame)) => frame,
        };

        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Non UTF-8 frame on runner socket");
                    break;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(error = %e, "Runner socket receive failed");
                break;
            }
        };

        match parse_frame(&text) {
            Inbound::Run(code) => {
                let run = Run::new(code);
                let run_id = run.id;
                let signal = connection.child_token();
                let outbound: Arc<dyn OutboundChannel> = channel.clone();
                if !state.sessions.register(run_id, outbound, signal.clone()) {
                    warn!(%run_id, "Session already registered for run");
                    continue;
                }

                match state.service.schedule_run(run).await {
                    Ok(_) => runs.push(signal.cancelled_owned()),
                    Err(e) => {
                        warn!(%run_id, "Failed to schedule run from socket: {:#}", e);
                        state.sessions.unregister(run_id);
                    }
                }
            }
            Inbound::MissingCode => warn!("Run command has no code"),
            Inbound::Unknown(command) => {
                warn!(command = ?command, "Unknown command in runner socket")
            }
            Inbound::Terminate => {
                warn!("Null or malformed frame in runner socket, closing");
                break;
            }
        }
    }

    // Detaches every session of this connection and kills their containers
    connection.cancel();
    info!("Runner socket disconnected");
}
