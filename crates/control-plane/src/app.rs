// Process wiring
// Decision: One struct owns every shared handle; main only reads config and drives shutdown
//
// storage --(outbox rows)--> publisher --(bus)--> consumer --> RunCodeHandler --> executor
//    ^                                                                              |
//    +-- POST /schedule, WS /runner                      sessions <-----------------+

use std::sync::Arc;

use anyhow::{bail, Result};
use axum::http::{header, Method};
use axum::Router;
use coderunner_bus::{BusBackend, BusConfig, BusKind};
use coderunner_core::{SessionRegistry, Warmup};
use coderunner_outbox::{OutboxConfig, OutboxJanitor, OutboxPublisher};
use coderunner_storage::StorageBackend;
use coderunner_worker::{
    ConsumerConfig, ContainerRuntime, ExecutionConsumer, RunCodeHandler, SandboxConfig,
    SandboxExecutor,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::config::ServerConfig;
use crate::openapi::ApiDoc;
use crate::services::RunService;

/// Shared handles of a running Coderunner process
pub struct Coderunner {
    pub storage: StorageBackend,
    pub sessions: SessionRegistry,
    pub bus: BusBackend,
    pub warmup: Warmup,
    pub runs: Arc<RunService>,
    executor: Arc<SandboxExecutor>,
    outbox_config: OutboxConfig,
    consumer_config: ConsumerConfig,
}

impl Coderunner {
    pub fn new(
        storage: StorageBackend,
        bus: BusBackend,
        runtime: Arc<dyn ContainerRuntime>,
        sandbox_config: SandboxConfig,
        outbox_config: OutboxConfig,
        consumer_config: ConsumerConfig,
    ) -> Self {
        let sessions = SessionRegistry::new();
        let runs = Arc::new(RunService::new(storage.clone(), outbox_config.topic.clone()));
        let executor = Arc::new(SandboxExecutor::new(
            runtime,
            sessions.clone(),
            sandbox_config,
        ));

        Self {
            storage,
            sessions,
            bus,
            warmup: Warmup::new(),
            runs,
            executor,
            outbox_config,
            consumer_config,
        }
    }

    /// HTTP + WebSocket routes
    pub fn router(&self, config: &ServerConfig) -> Router {
        let api_routes = Router::new()
            .merge(api::runs::routes(api::runs::AppState::new(self.runs.clone())))
            .merge(api::runner::routes(api::runner::AppState::new(
                self.runs.clone(),
                self.sessions.clone(),
            )));

        let app = Router::new()
            .merge(api::health::routes(api::health::HealthState {
                storage: self.storage.clone(),
            }))
            .merge(build_router_with_prefix(api_routes, &config.api_prefix))
            .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

        let app = if config.cors_allowed_origins.is_empty() {
            app
        } else {
            app.layer(
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(config.cors_allowed_origins.clone()))
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
            )
        };

        app.layer(TraceLayer::new_for_http())
    }

    /// Start publisher, janitor and consumer. Each waits for `warmup` first.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let store = self.storage.outbox_store();

        let publisher = OutboxPublisher::new(
            store.clone(),
            self.bus.producer(),
            self.outbox_config.clone(),
        )
        .with_warmup(self.warmup.clone());

        let janitor = OutboxJanitor::new(store, self.outbox_config.clone())
            .with_warmup(self.warmup.clone());

        let handler = Arc::new(RunCodeHandler::new(
            self.storage.clone(),
            self.executor.clone(),
        ));
        let consumer = ExecutionConsumer::new(
            self.bus.subscribe(&self.outbox_config.topic),
            handler,
            self.consumer_config.clone(),
        )
        .with_warmup(self.warmup.clone());

        vec![
            tokio::spawn(publisher.run(shutdown.clone())),
            tokio::spawn(janitor.run(shutdown.clone())),
            tokio::spawn(consumer.run(shutdown)),
        ]
    }
}

/// Bus that goes with `storage`, unless `config.backend` names one
///
/// Postgres storage never pairs with the in-memory bus: a row the outbox
/// marked Sent would then only exist in process memory.
pub fn select_bus(config: BusConfig, storage: &StorageBackend) -> Result<BusBackend> {
    match (config.backend, storage.pool()) {
        (Some(BusKind::Memory), Some(_)) => {
            bail!("BUS_BACKEND=memory cannot be combined with Postgres storage")
        }
        (Some(BusKind::Postgres), None) => bail!("BUS_BACKEND=postgres requires DATABASE_URL"),
        (_, Some(pool)) => Ok(BusBackend::postgres(pool.clone(), config)),
        (_, None) => Ok(BusBackend::in_memory(config)),
    }
}

/// Build router with optional API prefix (extracted for testing)
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
