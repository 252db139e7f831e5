//! Saga administration endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CallerContext, SagaId};
use saga::{SagaExecutionContext, SagaOrchestrator, SagaStatistics};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct StartSagaRequest {
    #[serde(default)]
    pub data: serde_json::Value,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
}

impl StartSagaRequest {
    fn caller_context(&self) -> Option<CallerContext> {
        if self.tenant_id.is_none() && self.user_id.is_none() {
            return None;
        }
        Some(CallerContext {
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
        })
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub saga_id: SagaId,
    pub stopped: bool,
}

fn parse_id(raw: &str) -> Result<SagaId, ApiError> {
    SagaId::parse(raw).map_err(|e| ApiError::BadRequest(format!("Invalid saga ID: {e}")))
}

// -- Handlers --

/// GET /sagas: every tracked instance, oldest first.
pub async fn list(
    State(orchestrator): State<SagaOrchestrator>,
) -> Json<Vec<SagaExecutionContext>> {
    Json(orchestrator.get_all_saga_statuses().await)
}

/// POST /sagas/{saga_type}: runs a saga to completion and returns its context.
#[tracing::instrument(skip(orchestrator, req))]
pub async fn start(
    State(orchestrator): State<SagaOrchestrator>,
    Path(saga_type): Path<String>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<SagaExecutionContext>), ApiError> {
    let caller_context = req.caller_context();
    let context = orchestrator
        .start_saga(&saga_type, req.data, caller_context)
        .await?;
    tracing::info!(saga_id = %context.saga_id, status = %context.status, "saga finished");
    Ok((StatusCode::CREATED, Json(context)))
}

/// GET /sagas/{id}
pub async fn get(
    State(orchestrator): State<SagaOrchestrator>,
    Path(id): Path<String>,
) -> Result<Json<SagaExecutionContext>, ApiError> {
    let saga_id = parse_id(&id)?;
    orchestrator
        .get_saga_status(saga_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Saga {saga_id} not found")))
}

/// POST /sagas/{id}/stop
#[tracing::instrument(skip(orchestrator))]
pub async fn stop(
    State(orchestrator): State<SagaOrchestrator>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let saga_id = parse_id(&id)?;
    let stopped = orchestrator.stop_saga(saga_id).await;
    Ok(Json(StopResponse { saga_id, stopped }))
}

/// POST /sagas/{id}/compensate
#[tracing::instrument(skip(orchestrator))]
pub async fn compensate(
    State(orchestrator): State<SagaOrchestrator>,
    Path(id): Path<String>,
) -> Result<Json<SagaExecutionContext>, ApiError> {
    let saga_id = parse_id(&id)?;
    Ok(Json(orchestrator.compensate_saga(saga_id).await?))
}

/// GET /statistics
pub async fn statistics(State(orchestrator): State<SagaOrchestrator>) -> Json<SagaStatistics> {
    Json(orchestrator.get_statistics().await)
}
