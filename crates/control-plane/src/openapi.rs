// OpenAPI specification generation
//
// Shared by the server (Swagger UI) and the export-openapi binary.

use crate::api;
use coderunner_core::{Outcome, Phase, Run, RunNotification};
use utoipa::OpenApi;

/// OpenAPI documentation for the Coderunner API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::runs::schedule,
        api::runs::get_run,
        api::health::health,
    ),
    components(
        schemas(
            Run,
            api::runs::ScheduleRequest,
            api::runs::ScheduleResponse,
            api::health::HealthResponse,
            api::common::ErrorResponse,
            // Frames pushed over the /runner WebSocket
            RunNotification, Phase, Outcome,
        )
    ),
    tags(
        (name = "runs", description = "Run scheduling endpoints"),
        (name = "health", description = "Service health")
    ),
    info(
        title = "Coderunner API",
        version = "0.1.0",
        description = "Schedule code for sandboxed execution. Live progress is streamed over the /runner WebSocket.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> String {
        Self::openapi()
            .to_pretty_json()
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}
