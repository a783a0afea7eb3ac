// Coderunner server
// Decision: Background loops start only once the listener is bound (warmup gate)
// Decision: Ctrl-C flips a watch channel; loops finish their current unit and exit

use std::sync::Arc;

use anyhow::{Context, Result};
use coderunner_bus::BusConfig;
use coderunner_control_plane::{select_bus, Coderunner, ServerConfig};
use coderunner_core::{init_telemetry, TelemetryConfig};
use coderunner_outbox::OutboxConfig;
use coderunner_storage::{StorageBackend, StorageConfig};
use coderunner_worker::{ConsumerConfig, DockerCli, SandboxConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - SERVICE_NAME / SERVICE_VERSION
    // - RUST_LOG or LOG_LEVEL: log filter (default: "coderunner=debug,tower_http=debug,info")
    // - LOG_FORMAT=json: JSON lines
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_version.is_none() {
        telemetry_config = telemetry_config.with_service_version(env!("CARGO_PKG_VERSION"));
    }
    init_telemetry(telemetry_config);

    tracing::info!("coderunner starting...");

    let server_config = ServerConfig::from_env()?;
    let storage = StorageBackend::from_config(&StorageConfig::from_env())
        .await
        .context("Failed to initialize storage")?;
    let bus = select_bus(BusConfig::from_env(), &storage).context("Failed to select bus")?;
    let outbox_config = OutboxConfig::from_env();
    let sandbox_config = SandboxConfig::from_env();

    tracing::info!(
        storage = storage.kind(),
        bus = bus.kind().as_str(),
        topic = %outbox_config.topic,
        partitions = bus.config().partitions,
        consumer_group = %bus.config().consumer_group,
        build_image = %sandbox_config.build_image,
        run_image = %sandbox_config.run_image,
        "Configuration loaded"
    );

    let runtime = Arc::new(DockerCli::new(sandbox_config.docker_bin.clone()));
    let coderunner = Coderunner::new(
        storage,
        bus,
        runtime,
        sandbox_config,
        outbox_config,
        ConsumerConfig::from_env(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = coderunner.spawn_background(shutdown_rx);

    if !server_config.cors_allowed_origins.is_empty() {
        tracing::info!(origins = ?server_config.cors_allowed_origins, "CORS origins configured");
    }
    let app = coderunner.router(&server_config);

    let listener = tokio::net::TcpListener::bind(server_config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", server_config.bind_addr);

    coderunner.warmup.mark_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("Server error")?;

    coderunner.bus.close();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("Background task failed: {}", e);
        }
    }

    tracing::info!("coderunner stopped");
    Ok(())
}
