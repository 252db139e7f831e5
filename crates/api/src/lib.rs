//! HTTP admin API with observability for the saga orchestrator.
//!
//! Provides REST endpoints to start, inspect, stop and compensate sagas,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService,
    OrchestratorConfig, OrderFulfillmentSaga, SagaError, SagaOrchestrator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::metrics::MetricsState;

/// Creates the Axum application router over `orchestrator`.
pub fn create_app(orchestrator: SagaOrchestrator, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            orchestrator: orchestrator.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/statistics", get(routes::sagas::statistics))
        .route("/sagas", get(routes::sagas::list))
        // POST names a saga type, GET a saga id.
        .route(
            "/sagas/{id}",
            post(routes::sagas::start).get(routes::sagas::get),
        )
        .route("/sagas/{id}/stop", post(routes::sagas::stop))
        .route("/sagas/{id}/compensate", post(routes::sagas::compensate))
        .with_state(orchestrator)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds and starts an orchestrator with the order fulfillment saga
/// registered over in-memory services.
pub async fn create_default_orchestrator(
    config: OrchestratorConfig,
) -> Result<SagaOrchestrator, SagaError> {
    let orchestrator = SagaOrchestrator::new(config);
    let order_fulfillment = OrderFulfillmentSaga::new(
        InMemoryInventoryService::new(),
        InMemoryPaymentService::new(),
        InMemoryShippingService::new(),
    );
    orchestrator
        .register_saga(Arc::new(order_fulfillment))
        .await?;
    orchestrator.start().await;
    Ok(orchestrator)
}
