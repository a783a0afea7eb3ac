// Health endpoint

use axum::{extract::State, routing::get, Json, Router};
use coderunner_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub version: String,
    /// Active storage backend ("postgres" or "memory")
    #[schema(example = "postgres")]
    pub storage: String,
}

/// State for health endpoint
#[derive(Clone)]
pub struct HealthState {
    pub storage: StorageBackend,
}

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// GET /health - Liveness and build info
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.storage.kind().to_string(),
    })
}
