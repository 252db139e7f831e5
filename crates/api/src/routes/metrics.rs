//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaOrchestrator;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub orchestrator: SagaOrchestrator,
}

/// GET /metrics: refreshes the active-saga gauge, then renders every metric.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    state.orchestrator.refresh_statistics().await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.handle.render(),
    )
}
