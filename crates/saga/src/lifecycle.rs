//! Bookkeeping shared by the executor and the orchestrator on every status
//! change: statistics, metrics, logging and lifecycle events.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::context::SagaExecutionContext;
use crate::events::{EventDispatcher, LifecycleEventType, SagaLifecycleEvent};
use crate::state::SagaStatus;
use crate::statistics::SagaStatistics;

#[derive(Clone, Default)]
pub(crate) struct LifecycleRecorder {
    statistics: Arc<RwLock<SagaStatistics>>,
    dispatcher: EventDispatcher,
}

impl LifecycleRecorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub(crate) async fn statistics(&self) -> SagaStatistics {
        self.statistics.read().await.clone()
    }

    pub(crate) async fn refresh_statistics(&self, active_sagas: u64) {
        self.statistics
            .write()
            .await
            .refresh(Utc::now(), active_sagas);
    }

    /// Records a freshly stored, running instance.
    pub(crate) async fn started(&self, context: &SagaExecutionContext) {
        self.statistics.write().await.record_started(
            &context.saga_type,
            context.tenant_id(),
            context.start_time,
        );
        metrics::counter!("saga_started_total", "saga_type" => context.saga_type.clone())
            .increment(1);
        tracing::info!(
            saga_id = %context.saga_id,
            saga_type = %context.saga_type,
            steps = context.steps.len(),
            "saga started"
        );
        self.emit(LifecycleEventType::Started, context).await;
    }

    /// Records `context` having moved from `from` to its current status.
    pub(crate) async fn transitioned(&self, from: SagaStatus, context: &SagaExecutionContext) {
        let to = context.status;
        let duration_ms = context
            .duration()
            .map(|d| d.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0);
        self.statistics
            .write()
            .await
            .record_transition(from, to, duration_ms);

        let saga_type = context.saga_type.clone();
        match to {
            SagaStatus::Completed => {
                metrics::counter!("saga_completed_total", "saga_type" => saga_type.clone())
                    .increment(1);
                tracing::info!(saga_id = %context.saga_id, duration_ms, "saga completed");
            }
            SagaStatus::Failed => {
                metrics::counter!("saga_failed_total", "saga_type" => saga_type.clone())
                    .increment(1);
                tracing::warn!(
                    saga_id = %context.saga_id,
                    error = context.error.as_deref().unwrap_or("unknown"),
                    "saga failed"
                );
            }
            SagaStatus::Timeout => {
                metrics::counter!("saga_timeout_total", "saga_type" => saga_type.clone())
                    .increment(1);
                tracing::warn!(
                    saga_id = %context.saga_id,
                    timeout = ?context.timeout,
                    "saga timed out"
                );
            }
            SagaStatus::Cancelled => {
                metrics::counter!("saga_cancelled_total", "saga_type" => saga_type.clone())
                    .increment(1);
                tracing::info!(saga_id = %context.saga_id, "saga cancelled");
            }
            SagaStatus::Compensating => {
                tracing::info!(saga_id = %context.saga_id, %from, "saga compensation started");
            }
            SagaStatus::Compensated => {
                metrics::counter!("saga_compensated_total", "saga_type" => saga_type.clone())
                    .increment(1);
                tracing::info!(
                    saga_id = %context.saga_id,
                    failed_compensations = context.failed_compensations().len(),
                    "saga compensated"
                );
            }
            SagaStatus::NotStarted | SagaStatus::Running => {}
        }
        if let Some(duration_ms) = duration_ms {
            metrics::histogram!(
                "saga_duration_seconds",
                "saga_type" => saga_type,
                "status" => to.as_str()
            )
            .record(duration_ms / 1000.0);
        }

        if let Some(event_type) = LifecycleEventType::for_status(to) {
            self.emit(event_type, context).await;
        }
    }

    async fn emit(&self, event_type: LifecycleEventType, context: &SagaExecutionContext) {
        let event = SagaLifecycleEvent::from_context(event_type, context);
        self.dispatcher.dispatch(&event).await;
    }
}
