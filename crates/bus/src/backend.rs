// Bus backend selection
// Decision: Enum dispatch, mirroring the storage backend
//
// InMemory for dev mode; Postgres whenever storage is Postgres, so a row the
// outbox marked Sent is never only held in process memory.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{BusConfig, BusKind, EventConsumer, EventProducer, InMemoryBus, PostgresBus};

/// The bus a process publishes to and consumes from
#[derive(Clone)]
pub enum BusBackend {
    InMemory(InMemoryBus),
    Postgres(PostgresBus),
}

impl BusBackend {
    pub fn in_memory(config: BusConfig) -> Self {
        Self::InMemory(InMemoryBus::new(config))
    }

    pub fn postgres(pool: PgPool, config: BusConfig) -> Self {
        Self::Postgres(PostgresBus::new(pool, config))
    }

    pub fn kind(&self) -> BusKind {
        match self {
            Self::InMemory(_) => BusKind::Memory,
            Self::Postgres(_) => BusKind::Postgres,
        }
    }

    pub fn config(&self) -> &BusConfig {
        match self {
            Self::InMemory(bus) => bus.config(),
            Self::Postgres(bus) => bus.config(),
        }
    }

    pub fn producer(&self) -> Arc<dyn EventProducer> {
        match self {
            Self::InMemory(bus) => Arc::new(bus.clone()),
            Self::Postgres(bus) => Arc::new(bus.clone()),
        }
    }

    /// Subscribe to `topic` as the configured consumer group
    pub fn subscribe(&self, topic: &str) -> Arc<dyn EventConsumer> {
        match self {
            Self::InMemory(bus) => Arc::new(bus.subscribe(topic)),
            Self::Postgres(bus) => Arc::new(bus.subscribe(topic)),
        }
    }

    pub fn close(&self) {
        match self {
            Self::InMemory(bus) => bus.close(),
            Self::Postgres(bus) => bus.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::InMemory(bus) => bus.is_closed(),
            Self::Postgres(bus) => bus.is_closed(),
        }
    }
}

impl From<InMemoryBus> for BusBackend {
    fn from(bus: InMemoryBus) -> Self {
        Self::InMemory(bus)
    }
}

impl From<PostgresBus> for BusBackend {
    fn from(bus: PostgresBus) -> Self {
        Self::Postgres(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend_round_trip() {
        let bus = BusBackend::in_memory(BusConfig::default());
        assert_eq!(bus.kind(), BusKind::Memory);

        let consumer = bus.subscribe("events");
        bus.producer().produce("events", "k", b"v").await.unwrap();

        let message = consumer.recv().await.unwrap();
        assert_eq!(message.value, b"v");
        consumer.commit(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_reaches_the_inner_bus() {
        let bus = BusBackend::in_memory(BusConfig::default());
        bus.close();

        assert!(bus.is_closed());
        assert!(bus.producer().produce("events", "k", b"v").await.is_err());
    }
}
