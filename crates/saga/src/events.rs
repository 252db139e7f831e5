//! Saga lifecycle events and their handler registry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CallerContext, SagaId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::context::SagaExecutionContext;
use crate::error::SagaError;
use crate::state::SagaStatus;

/// The kinds of lifecycle notification the orchestrator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEventType {
    Started,
    Completed,
    Failed,
    Cancelled,
    Compensated,
    TimedOut,
}

impl LifecycleEventType {
    /// The dotted event name, e.g. `saga.completed`.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEventType::Started => "saga.started",
            LifecycleEventType::Completed => "saga.completed",
            LifecycleEventType::Failed => "saga.failed",
            LifecycleEventType::Cancelled => "saga.cancelled",
            LifecycleEventType::Compensated => "saga.compensated",
            LifecycleEventType::TimedOut => "saga.timeout",
        }
    }

    /// The event announcing a saga's arrival at `status`, if any.
    pub fn for_status(status: SagaStatus) -> Option<Self> {
        match status {
            SagaStatus::Running => Some(LifecycleEventType::Started),
            SagaStatus::Completed => Some(LifecycleEventType::Completed),
            SagaStatus::Failed => Some(LifecycleEventType::Failed),
            SagaStatus::Cancelled => Some(LifecycleEventType::Cancelled),
            SagaStatus::Compensated => Some(LifecycleEventType::Compensated),
            SagaStatus::Timeout => Some(LifecycleEventType::TimedOut),
            SagaStatus::NotStarted | SagaStatus::Compensating => None,
        }
    }
}

impl std::fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A notification about a saga instance reaching a notable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaLifecycleEvent {
    pub event_type: LifecycleEventType,
    pub saga_id: SagaId,
    pub saga_type: String,
    pub status: SagaStatus,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub caller_context: Option<CallerContext>,
    pub occurred_at: DateTime<Utc>,
}

impl SagaLifecycleEvent {
    pub fn from_context(event_type: LifecycleEventType, context: &SagaExecutionContext) -> Self {
        Self {
            event_type,
            saga_id: context.saga_id,
            saga_type: context.saga_type.clone(),
            status: context.status,
            error: context.error.clone(),
            duration_ms: context.duration().map(|d| d.num_milliseconds()),
            caller_context: context.caller_context.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// A consumer of lifecycle events.
#[async_trait]
pub trait SagaEventHandler: Send + Sync {
    /// Unique handler name, used for unregistration.
    fn name(&self) -> &str;

    /// The event type this handler listens to; `None` listens to all.
    fn event_type(&self) -> Option<LifecycleEventType> {
        None
    }

    /// Higher priorities run first.
    fn priority(&self) -> i32 {
        0
    }

    fn should_handle(&self, event: &SagaLifecycleEvent) -> bool {
        self.event_type()
            .is_none_or(|event_type| event_type == event.event_type)
    }

    async fn handle(&self, event: &SagaLifecycleEvent) -> Result<(), SagaError>;
}

/// Registry of lifecycle handlers.
///
/// Handlers are kept sorted by descending priority; registration order breaks
/// ties. A failing handler is logged and the remaining handlers still run.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<Vec<Arc<dyn SagaEventHandler>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any handler with the same name.
    pub async fn register(&self, handler: Arc<dyn SagaEventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.retain(|existing| existing.name() != handler.name());
        let position = handlers
            .iter()
            .position(|existing| existing.priority() < handler.priority())
            .unwrap_or(handlers.len());
        tracing::debug!(
            handler = handler.name(),
            priority = handler.priority(),
            "event handler registered"
        );
        handlers.insert(position, handler);
    }

    /// Removes a handler by name. Returns false if none was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|handler| handler.name() != name);
        before != handlers.len()
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Delivers `event` to every matching handler.
    ///
    /// Returns the number of handlers that handled it successfully.
    #[tracing::instrument(
        skip(self, event),
        fields(event = %event.event_type, saga_id = %event.saga_id)
    )]
    pub async fn dispatch(&self, event: &SagaLifecycleEvent) -> usize {
        // Snapshot so handlers may (un)register without deadlocking.
        let handlers: Vec<_> = self.handlers.read().await.clone();

        let mut delivered = 0;
        for handler in handlers.iter().filter(|h| h.should_handle(event)) {
            match handler.handle(event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(handler = handler.name(), error = %e, "event handler failed");
                    metrics::counter!("saga_event_handler_failures_total").increment(1);
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SagaOptions;
    use crate::step::SagaStep;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        priority: i32,
        filter: Option<LifecycleEventType>,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl SagaEventHandler for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn event_type(&self) -> Option<LifecycleEventType> {
            self.filter
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn handle(&self, _event: &SagaLifecycleEvent) -> Result<(), SagaError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                return Err(SagaError::Handler(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        priority: i32,
        filter: Option<LifecycleEventType>,
        fail: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn SagaEventHandler> {
        Arc::new(Recorder {
            name,
            priority,
            filter,
            fail,
            log: Arc::clone(log),
        })
    }

    fn event(event_type: LifecycleEventType) -> SagaLifecycleEvent {
        let ctx = SagaExecutionContext::new(
            "Test",
            vec![SagaStep::new("a", "A", 1)],
            serde_json::Value::Null,
            &SagaOptions::default(),
            None,
        );
        SagaLifecycleEvent::from_context(event_type, &ctx)
    }

    #[test]
    fn test_event_names() {
        assert_eq!(LifecycleEventType::Completed.name(), "saga.completed");
        assert_eq!(LifecycleEventType::Failed.name(), "saga.failed");
        assert_eq!(LifecycleEventType::Cancelled.name(), "saga.cancelled");
        assert_eq!(LifecycleEventType::Compensated.name(), "saga.compensated");
        assert_eq!(LifecycleEventType::TimedOut.to_string(), "saga.timeout");
    }

    #[test]
    fn test_for_status() {
        assert_eq!(
            LifecycleEventType::for_status(SagaStatus::Compensated),
            Some(LifecycleEventType::Compensated)
        );
        assert_eq!(LifecycleEventType::for_status(SagaStatus::Compensating), None);
    }

    #[tokio::test]
    async fn test_dispatch_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.register(recorder("low", 1, None, false, &log)).await;
        dispatcher.register(recorder("high", 10, None, false, &log)).await;
        dispatcher.register(recorder("mid", 5, None, false, &log)).await;

        let delivered = dispatcher.dispatch(&event(LifecycleEventType::Completed)).await;
        assert_eq!(delivered, 3);
        assert_eq!(*log.lock().unwrap(), ["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_filter_by_event_type() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher
            .register(recorder("failures", 0, Some(LifecycleEventType::Failed), false, &log))
            .await;

        assert_eq!(dispatcher.dispatch(&event(LifecycleEventType::Completed)).await, 0);
        assert_eq!(dispatcher.dispatch(&event(LifecycleEventType::Failed)).await, 1);
        assert_eq!(*log.lock().unwrap(), ["failures"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.register(recorder("broken", 10, None, true, &log)).await;
        dispatcher.register(recorder("healthy", 0, None, false, &log)).await;

        let delivered = dispatcher.dispatch(&event(LifecycleEventType::Cancelled)).await;
        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), ["broken", "healthy"]);
    }

    #[tokio::test]
    async fn test_register_replaces_and_unregister_removes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.register(recorder("audit", 0, None, false, &log)).await;
        dispatcher.register(recorder("audit", 3, None, false, &log)).await;
        assert_eq!(dispatcher.handler_count().await, 1);

        assert!(dispatcher.unregister("audit").await);
        assert!(!dispatcher.unregister("audit").await);
        assert_eq!(dispatcher.handler_count().await, 0);
    }
}
