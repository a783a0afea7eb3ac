//! Outbox publisher
//!
//! Drains New/Failed rows to the bus in `(date, id)` order. A row becomes Sent
//! only after the bus acknowledged it; anything else leaves the row untouched
//! for the next poll. A crash between the ack and the status update publishes
//! the row again, so consumers must tolerate duplicates.

use std::sync::Arc;

use coderunner_bus::EventProducer;
use coderunner_core::Warmup;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::{OutboxConfig, OutboxEvent, OutboxStore, StoreError};

/// Outcome counts of one poll
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Rows picked up
    pub attempted: usize,
    /// Rows acknowledged by the bus and marked Sent
    pub sent: usize,
    /// Rows left pending (produce error, ack timeout or status update failure)
    pub failed: usize,
}

/// Polling publisher
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    producer: Arc<dyn EventProducer>,
    config: OutboxConfig,
    warmup: Warmup,
}

impl OutboxPublisher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        producer: Arc<dyn EventProducer>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            producer,
            config,
            warmup: Warmup::ready(),
        }
    }

    /// Hold the loop until `warmup` opens
    pub fn with_warmup(mut self, warmup: Warmup) -> Self {
        self.warmup = warmup;
        self
    }

    /// Publish every pending row once, fetching `batch_size` rows per page
    ///
    /// Pages follow the `(date, id)` cursor of the last row seen, so rows that
    /// keep failing never hide the ones queued behind them.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<PublishReport, StoreError> {
        let page_size = self.config.batch_size.max(1);
        let mut report = PublishReport::default();
        let mut after = None;

        loop {
            let events = self.store.pending_events_after(after, page_size).await?;
            let Some(last) = events.last() else {
                break;
            };
            after = Some(last.cursor());
            report.attempted += events.len();

            for event in &events {
                if self.publish(event).await {
                    report.sent += 1;
                } else {
                    report.failed += 1;
                }
            }

            if (events.len() as i64) < page_size {
                break;
            }
        }

        if report.attempted > 0 {
            debug!(
                attempted = report.attempted,
                sent = report.sent,
                failed = report.failed,
                "Outbox poll finished"
            );
        }
        Ok(report)
    }

    async fn publish(&self, event: &OutboxEvent) -> bool {
        let produce = self.producer.produce(
            &event.target,
            &event.event_key,
            event.payload.as_bytes(),
        );

        match tokio::time::timeout(self.config.ack_timeout, produce).await {
            Ok(Ok(delivery)) => match self.store.mark_sent(event.id).await {
                Ok(_) => {
                    info!(
                        event_id = event.id,
                        event_type = %event.event_type,
                        topic = %event.target,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Sent outbox event"
                    );
                    true
                }
                Err(e) => {
                    error!(event_id = event.id, error = %e, "Failed to mark outbox event sent");
                    false
                }
            },
            Ok(Err(e)) => {
                warn!(
                    event_id = event.id,
                    topic = %event.target,
                    error = %e,
                    "Failed to publish outbox event"
                );
                false
            }
            Err(_) => {
                warn!(
                    event_id = event.id,
                    topic = %event.target,
                    timeout_ms = self.config.ack_timeout.as_millis() as u64,
                    "Timed out waiting for outbox event ack"
                );
                false
            }
        }
    }

    /// Poll every `poll_interval` until `shutdown` flips or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = self.warmup.wait() => {}
            _ = shutdown.changed() => {
                debug!("Outbox publisher: shutdown before warmup");
                return;
            }
        }

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbox publisher started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Outbox poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Outbox publisher: shutdown requested");
                    break;
                }
            }
        }

        info!("Outbox publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryOutboxStore, NewOutboxEvent, OutboxStatus};
    use async_trait::async_trait;
    use coderunner_bus::{
        BusConfig, BusError, DeliveryReport, EventConsumer, InMemoryBus,
    };
    use coderunner_core::DomainEvent;
    use parking_lot::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    const TOPIC: &str = "coderunner_outbox_events";

    fn insert_run_event(store: &InMemoryOutboxStore) -> (Uuid, i64) {
        let run_id = Uuid::now_v7();
        let row = NewOutboxEvent::from_domain(&DomainEvent::run_code(run_id), TOPIC).unwrap();
        (run_id, store.insert(row))
    }

    fn publisher(
        store: Arc<InMemoryOutboxStore>,
        producer: Arc<dyn EventProducer>,
    ) -> OutboxPublisher {
        OutboxPublisher::new(store, producer, OutboxConfig::default())
    }

    /// Records keys in produce order, failing for selected keys
    #[derive(Default)]
    struct ScriptedProducer {
        produced: Mutex<Vec<String>>,
        failing_keys: Mutex<Vec<String>>,
        hang: bool,
    }

    #[async_trait]
    impl EventProducer for ScriptedProducer {
        async fn produce(
            &self,
            _topic: &str,
            key: &str,
            _value: &[u8],
        ) -> Result<DeliveryReport, BusError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.failing_keys.lock().iter().any(|k| k == key) {
                return Err(BusError::Delivery("broker unavailable".into()));
            }
            self.produced.lock().push(key.to_string());
            Ok(DeliveryReport {
                partition: 0,
                offset: 0,
            })
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_poll_publishes_and_marks_sent() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let bus = InMemoryBus::new(BusConfig::default());
        let (run_id, id) = insert_run_event(&store);

        let report = publisher(store.clone(), Arc::new(bus.clone()))
            .poll_once()
            .await
            .unwrap();

        assert_eq!(report, PublishReport { attempted: 1, sent: 1, failed: 0 });
        assert_eq!(store.get(id).unwrap().status, OutboxStatus::Sent);

        let consumer = bus.subscribe(TOPIC);
        let message = consumer.recv().await.unwrap();
        assert_eq!(message.key, run_id.to_string());
        assert_eq!(
            DomainEvent::from_bytes(&message.value).unwrap(),
            DomainEvent::run_code(run_id)
        );
    }

    #[tokio::test]
    async fn test_sent_rows_are_not_republished() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer::default());
        insert_run_event(&store);

        let publisher = publisher(store.clone(), producer.clone());
        publisher.poll_once().await.unwrap();
        let second = publisher.poll_once().await.unwrap();

        assert_eq!(second.attempted, 0);
        assert_eq!(producer.produced.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_publishes_in_insertion_order() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer::default());
        let keys: Vec<String> = (0..3)
            .map(|_| insert_run_event(&store).0.to_string())
            .collect();

        publisher(store, producer.clone()).poll_once().await.unwrap();

        assert_eq!(*producer.produced.lock(), keys);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_produce_leaves_row_pending_and_continues() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer::default());
        let (bad_run, bad_id) = insert_run_event(&store);
        let (_, good_id) = insert_run_event(&store);
        producer.failing_keys.lock().push(bad_run.to_string());

        let report = publisher(store.clone(), producer.clone())
            .poll_once()
            .await
            .unwrap();

        assert_eq!(report, PublishReport { attempted: 2, sent: 1, failed: 1 });
        assert_eq!(store.get(bad_id).unwrap().status, OutboxStatus::New);
        assert_eq!(store.get(good_id).unwrap().status, OutboxStatus::Sent);

        // Recovers on the next poll once the bus accepts the key
        producer.failing_keys.lock().clear();
        let retry = publisher(store.clone(), producer).poll_once().await.unwrap();
        assert_eq!(retry.sent, 1);
        assert_eq!(store.get(bad_id).unwrap().status, OutboxStatus::Sent);
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_rows_do_not_starve_later_rows() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer::default());
        for _ in 0..25 {
            let (run_id, _) = insert_run_event(&store);
            producer.failing_keys.lock().push(run_id.to_string());
        }
        let (good_run, good_id) = insert_run_event(&store);

        let publisher = OutboxPublisher::new(
            store.clone(),
            producer.clone(),
            OutboxConfig::default().with_batch_size(10),
        );
        let report = publisher.poll_once().await.unwrap();

        assert_eq!(report, PublishReport { attempted: 26, sent: 1, failed: 25 });
        assert_eq!(store.get(good_id).unwrap().status, OutboxStatus::Sent);
        assert_eq!(*producer.produced.lock(), vec![good_run.to_string()]);

        // Still-failing rows are attempted again on the next poll
        let retry = publisher.poll_once().await.unwrap();
        assert_eq!(retry, PublishReport { attempted: 25, sent: 0, failed: 25 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout_leaves_row_pending() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer {
            hang: true,
            ..Default::default()
        });
        let (_, id) = insert_run_event(&store);

        let report = publisher(store.clone(), producer).poll_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(store.get(id).unwrap().status, OutboxStatus::New);
    }

    #[tokio::test]
    async fn test_failed_rows_are_retried() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer::default());
        let (_, id) = insert_run_event(&store);
        store.set_status(id, OutboxStatus::Failed);

        let report = publisher(store.clone(), producer).poll_once().await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(store.get(id).unwrap().status, OutboxStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_picks_up_new_rows_and_stops() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(publisher(store.clone(), producer.clone()).run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let (_, id) = insert_run_event(&store);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(store.get(id).unwrap().status, OutboxStatus::Sent);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_waits_for_warmup() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let producer = Arc::new(ScriptedProducer::default());
        let warmup = Warmup::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_, id) = insert_run_event(&store);

        let handle = tokio::spawn(
            publisher(store.clone(), producer)
                .with_warmup(warmup.clone())
                .run(shutdown_rx),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get(id).unwrap().status, OutboxStatus::New);

        warmup.mark_ready();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get(id).unwrap().status, OutboxStatus::Sent);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
