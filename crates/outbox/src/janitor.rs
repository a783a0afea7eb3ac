//! Outbox retention janitor
//!
//! Periodically deletes Sent rows older than the retention window. New and
//! Failed rows are never touched regardless of age.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use coderunner_core::Warmup;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use crate::{OutboxConfig, OutboxStore, StoreError};

pub struct OutboxJanitor {
    store: Arc<dyn OutboxStore>,
    config: OutboxConfig,
    warmup: Warmup,
}

impl OutboxJanitor {
    pub fn new(store: Arc<dyn OutboxStore>, config: OutboxConfig) -> Self {
        Self {
            store,
            config,
            warmup: Warmup::ready(),
        }
    }

    pub fn with_warmup(mut self, warmup: Warmup) -> Self {
        self.warmup = warmup;
        self
    }

    /// Oldest date a Sent row may have and still be kept, relative to `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        now - retention
    }

    /// Delete expired Sent rows once
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        let cutoff = self.cutoff(Utc::now());
        let deleted = self.store.delete_sent_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, %cutoff, "Deleted sent outbox events");
        }
        Ok(deleted)
    }

    /// Sweep every `cleanup_interval` until `shutdown` flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = self.warmup.wait() => {}
            _ = shutdown.changed() => return,
        }

        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Outbox cleanup failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Outbox janitor: shutdown requested");
                    break;
                }
            }
        }

        debug!("Outbox janitor exited");
    }
}
