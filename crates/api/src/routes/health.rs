//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use saga::SagaOrchestrator;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health: 200 while the orchestrator is started, 503 otherwise.
pub async fn check(
    State(orchestrator): State<SagaOrchestrator>,
) -> (StatusCode, Json<HealthResponse>) {
    if orchestrator.health_check() {
        (StatusCode::OK, Json(HealthResponse { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
            }),
        )
    }
}
