// Run scheduling HTTP routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use coderunner_core::Run;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{internal_error, ApiError, ErrorResponse};
use crate::services::RunService;

/// Request to schedule a run
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScheduleRequest {
    /// Source code to build and execute.
    #[schema(example = "Console.WriteLine(\"Hello\");")]
    pub code: String,
}

/// Response of a schedule request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScheduleResponse {
    /// Id of the scheduled run.
    pub id: Uuid,
}

/// App state for run routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RunService>,
}

impl AppState {
    pub fn new(service: Arc<RunService>) -> Self {
        Self { service }
    }
}

/// Create run routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/schedule", post(schedule))
        .route("/runs/:run_id", get(get_run))
        .with_state(state)
}

/// POST /schedule - Schedule code for execution
#[utoipa::path(
    post,
    path = "/schedule",
    request_body = ScheduleRequest,
    responses(
        (status = 201, description = "Run scheduled", body = ScheduleResponse),
        (status = 400, description = "Empty code", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    if req.code.trim().is_empty() {
        return Err(ErrorResponse::new("code must not be empty").into_response(StatusCode::BAD_REQUEST));
    }

    let run = state.service.schedule(&req.code).await.map_err(|e| {
        tracing::error!("Failed to schedule run: {:#}", e);
        internal_error("failed to schedule run")
    })?;

    Ok((StatusCode::CREATED, Json(ScheduleResponse { id: run.id })))
}

/// GET /runs/{run_id} - Get a scheduled run
#[utoipa::path(
    get,
    path = "/runs/{run_id}",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run found", body = Run),
        (status = 404, description = "Run not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Run>, ApiError> {
    let run = state.service.get(run_id).await.map_err(|e| {
        tracing::error!(%run_id, "Failed to get run: {:#}", e);
        internal_error("failed to load run")
    })?;

    run.map(Json)
        .ok_or_else(|| ErrorResponse::new("run not found").into_response(StatusCode::NOT_FOUND))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use coderunner_core::DEFAULT_TOPIC;
    use coderunner_storage::StorageBackend;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let service = RunService::new(StorageBackend::in_memory(), DEFAULT_TOPIC);
        routes(AppState::new(Arc::new(service)))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn schedule_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/schedule")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_schedule_then_get() {
        let app = app();

        let response = app
            .clone()
            .oneshot(schedule_request(json!({"code": "Console.WriteLine(1);"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/runs/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let run = body_json(response).await;
        assert_eq!(run["id"], id);
        assert_eq!(run["code"], "Console.WriteLine(1);");
    }

    #[tokio::test]
    async fn test_schedule_rejects_blank_code() {
        let response = app()
            .oneshot(schedule_request(json!({"code": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "code must not be empty");
    }

    #[tokio::test]
    async fn test_schedule_rejects_missing_code() {
        let response = app().oneshot(schedule_request(json!({}))).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_get_unknown_run() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri(format!("/runs/{}", Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
