// Live session registry
//
// Correlates a run id with the client connection that asked for it, so the
// executor can push progress back to the right caller.
// Decision: dashmap for sharded locking; guards are never held across an await
// Decision: the cancellation token doubles as the completion signal

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Error writing to an outbound channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer is gone
    #[error("channel closed")]
    Closed,

    /// Transport-level failure
    #[error("send failed: {0}")]
    Send(String),
}

/// Outbound half of a live client connection
#[async_trait]
pub trait OutboundChannel: Send + Sync + 'static {
    /// Write one text frame to the client
    async fn send_text(&self, text: String) -> Result<(), ChannelError>;
}

struct SessionEntry {
    generation: u64,
    channel: Arc<dyn OutboundChannel>,
    signal: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
    sessions: DashMap<Uuid, SessionEntry>,
    next_generation: AtomicU64,
}

/// Concurrent map run id -> (outbound channel, completion signal)
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session for `run_id` unless one already exists.
    ///
    /// The entry is dropped automatically when `signal` fires.
    /// Must be called from within a Tokio runtime.
    pub fn register(
        &self,
        run_id: Uuid,
        channel: Arc<dyn OutboundChannel>,
        signal: CancellationToken,
    ) -> bool {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.inner.sessions.entry(run_id) {
            Entry::Occupied(_) => {
                warn!(%run_id, "session already registered");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    generation,
                    channel,
                    signal: signal.clone(),
                });
            }
        }

        let inner: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            signal.cancelled().await;
            if let Some(inner) = inner.upgrade() {
                // Only drop the entry this watcher was created for
                if inner
                    .sessions
                    .remove_if(&run_id, |_, entry| entry.generation == generation)
                    .is_some()
                {
                    debug!(%run_id, "session detached after cancellation");
                }
            }
        });

        debug!(%run_id, "session registered");
        true
    }

    /// Fire the session's signal and remove it. Returns whether a session was found.
    pub fn unregister(&self, run_id: Uuid) -> bool {
        match self.inner.sessions.remove(&run_id) {
            Some((_, entry)) => {
                entry.signal.cancel();
                debug!(%run_id, "session unregistered");
                true
            }
            None => false,
        }
    }

    /// Serialize `payload` and write it to the session's channel.
    ///
    /// Returns false without side effects when there is no live session.
    /// A slow channel stalls the caller until the write completes or the
    /// session's signal fires.
    pub async fn try_notify<T: Serialize + ?Sized>(&self, run_id: Uuid, payload: &T) -> bool {
        let (channel, signal) = match self.inner.sessions.get(&run_id) {
            Some(entry) => (Arc::clone(&entry.channel), entry.signal.clone()),
            None => return false,
        };

        if signal.is_cancelled() {
            return false;
        }

        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(%run_id, error = %e, "failed to serialize notification");
                return false;
            }
        };

        tokio::select! {
            biased;
            _ = signal.cancelled() => false,
            result = channel.send_text(text) => match result {
                Ok(()) => true,
                Err(e) => {
                    warn!(%run_id, error = %e, "failed to notify session");
                    false
                }
            }
        }
    }

    /// Completion signal of a live session, if any
    pub fn signal(&self, run_id: Uuid) -> Option<CancellationToken> {
        self.inner
            .sessions
            .get(&run_id)
            .map(|entry| entry.signal.clone())
    }

    pub fn contains(&self, run_id: Uuid) -> bool {
        self.inner.sessions.contains_key(&run_id)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }
}

/// Outbound channel that keeps every frame in memory.
///
/// Used by tests and by tooling that wants to observe notifications.
#[derive(Default)]
pub struct RecordingChannel {
    frames: Mutex<Vec<String>>,
    closed: std::sync::atomic::AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Frames parsed as JSON
    pub fn json_frames(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Make subsequent sends fail with [`ChannelError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.frames.lock().push(text);
        Ok(())
    }
}
