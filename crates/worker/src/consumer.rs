// Execution consumer
// Decision: One message at a time; the next recv only happens after the handler returned
// Decision: Handler and decode faults are logged and the message is committed anyway
// Decision: A bounded window of recently seen (key, type) pairs absorbs redeliveries
//
// Delivery is at-least-once: the outbox may publish a row twice and the bus
// redelivers uncommitted messages to a new subscriber of the same group.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coderunner_bus::{BusError, BusMessage, EventConsumer};
use coderunner_core::{DomainEvent, Warmup};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause after a transient receive error
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Handles one typed domain event
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("failed to decode message at {partition}/{offset}: {source}")]
    Deserialize {
        partition: u32,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of (key, type) pairs remembered for duplicate suppression; 0 disables
    pub dedup_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 1024,
        }
    }
}

impl ConsumerConfig {
    /// - `CONSUMER_DEDUP_CAPACITY`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dedup_capacity: std::env::var("CONSUMER_DEDUP_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dedup_capacity),
        }
    }
}

// ============================================
// Dedup window
// ============================================

/// FIFO-bounded set of recently dispatched events
pub struct DedupWindow {
    capacity: usize,
    state: Mutex<DedupState>,
}

#[derive(Default)]
struct DedupState {
    order: VecDeque<(String, String)>,
    seen: HashSet<(String, String)>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(DedupState::default()),
        }
    }

    /// Record the pair; returns false if it was already in the window
    pub fn insert(&self, key: &str, event_type: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }

        let entry = (key.to_string(), event_type.to_string());
        let mut state = self.state.lock();
        if state.seen.contains(&entry) {
            return false;
        }

        if state.order.len() >= self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.seen.remove(&oldest);
            }
        }
        state.order.push_back(entry.clone());
        state.seen.insert(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================
// Consumer loop
// ============================================

/// What happened to a dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Duplicate,
}

pub struct ExecutionConsumer {
    consumer: Arc<dyn EventConsumer>,
    handler: Arc<dyn MessageHandler>,
    dedup: DedupWindow,
    warmup: Warmup,
}

impl ExecutionConsumer {
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            consumer,
            handler,
            dedup: DedupWindow::new(config.dedup_capacity),
            warmup: Warmup::ready(),
        }
    }

    /// Gate the loop on `warmup`
    pub fn with_warmup(mut self, warmup: Warmup) -> Self {
        self.warmup = warmup;
        self
    }

    /// Decode `message` and hand it to the handler
    pub async fn dispatch(&self, message: &BusMessage) -> Result<Dispatch, ConsumerError> {
        let event =
            DomainEvent::from_bytes(&message.value).map_err(|source| ConsumerError::Deserialize {
                partition: message.partition,
                offset: message.offset,
                source,
            })?;

        if !self.dedup.insert(&message.key, event.event_type()) {
            debug!(
                key = %message.key,
                event_type = event.event_type(),
                offset = message.offset,
                "Skipping duplicate event"
            );
            return Ok(Dispatch::Duplicate);
        }

        debug!(
            key = %message.key,
            event_type = event.event_type(),
            partition = message.partition,
            offset = message.offset,
            "Dispatching event"
        );

        self.handler
            .handle(&event)
            .await
            .map_err(ConsumerError::Handler)?;
        Ok(Dispatch::Handled)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = self.warmup.wait() => {}
            _ = shutdown.changed() => {
                debug!("Execution consumer: shutdown before warmup");
                return;
            }
        }

        info!("Execution consumer started");

        loop {
            let received = tokio::select! {
                received = self.consumer.recv() => received,
                _ = shutdown.changed() => {
                    debug!("Execution consumer: shutdown requested");
                    break;
                }
            };

            let message = match received {
                Ok(message) => message,
                Err(BusError::Closed) => {
                    info!("Bus closed, execution consumer exiting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to receive message");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if let Err(e) = self.dispatch(&message).await {
                error!(
                    error = %e,
                    key = %message.key,
                    partition = message.partition,
                    offset = message.offset,
                    "Event handling failed, skipping"
                );
            }

            if let Err(e) = self.consumer.commit(&message).await {
                warn!(error = %e, offset = message.offset, "Failed to commit offset");
            }
        }

        info!("Execution consumer stopped");
    }
}
