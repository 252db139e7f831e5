//! Saga orchestrator: definition registry, instance table and lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use common::{CallerContext, SagaId};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::context::{CallerContextAccessor, SagaExecutionContext};
use crate::definition::SagaDefinition;
use crate::error::{Result, SagaError};
use crate::events::SagaEventHandler;
use crate::executor::StepExecutor;
use crate::lifecycle::LifecycleRecorder;
use crate::state::SagaStatus;
use crate::statistics::SagaStatistics;
use crate::table::ContextTable;

/// Registers saga definitions and drives their instances.
///
/// Cloning yields another handle to the same orchestrator. Construct one at
/// startup and hand clones to every caller.
#[derive(Clone)]
pub struct SagaOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    definitions: RwLock<HashMap<String, Arc<dyn SagaDefinition>>>,
    contexts: ContextTable,
    recorder: LifecycleRecorder,
    caller_context: Option<Arc<dyn CallerContextAccessor>>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A saga running on its own task.
pub struct SagaHandle {
    saga_id: SagaId,
    join: JoinHandle<Result<SagaExecutionContext>>,
}

impl SagaHandle {
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Waits for the saga to reach a terminal status.
    pub async fn wait(self) -> Result<SagaExecutionContext> {
        self.join
            .await
            .map_err(|e| SagaError::Aborted(e.to_string()))?
    }
}

impl SagaOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates an orchestrator that asks `accessor` for the caller context
    /// whenever a saga is started without one.
    pub fn with_caller_context_accessor(
        config: OrchestratorConfig,
        accessor: Arc<dyn CallerContextAccessor>,
    ) -> Self {
        Self::build(config, Some(accessor))
    }

    fn build(
        config: OrchestratorConfig,
        caller_context: Option<Arc<dyn CallerContextAccessor>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                definitions: RwLock::new(HashMap::new()),
                contexts: ContextTable::new(),
                recorder: LifecycleRecorder::new(),
                caller_context,
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    // -- Registry --

    /// Registers a definition, replacing any previous one of the same type.
    pub async fn register_saga(&self, definition: Arc<dyn SagaDefinition>) -> Result<()> {
        definition.validate()?;

        let saga_type = definition.saga_type().to_string();
        let replaced = self
            .inner
            .definitions
            .write()
            .await
            .insert(saga_type.clone(), definition)
            .is_some();
        tracing::info!(%saga_type, replaced, "saga registered");
        Ok(())
    }

    /// Removes a definition. Running instances of it are unaffected.
    pub async fn unregister_saga(&self, saga_type: &str) -> bool {
        let removed = self
            .inner
            .definitions
            .write()
            .await
            .remove(saga_type)
            .is_some();
        if removed {
            tracing::info!(%saga_type, "saga unregistered");
        }
        removed
    }

    pub async fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.inner.definitions.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    // -- Instances --

    /// Starts a saga and drives it to a terminal status.
    ///
    /// Fails without creating a context when the orchestrator is not started
    /// or `saga_type` is unknown. Step and compensation failures do not fail
    /// this call; they are reported in the returned context.
    #[tracing::instrument(skip(self, payload, caller_context))]
    pub async fn start_saga(
        &self,
        saga_type: &str,
        payload: serde_json::Value,
        caller_context: Option<CallerContext>,
    ) -> Result<SagaExecutionContext> {
        let (definition, saga_id) = self.prepare(saga_type, payload, caller_context).await?;
        self.drive(definition.as_ref(), saga_id).await
    }

    /// Starts a saga on a spawned task and returns immediately.
    ///
    /// The instance is already `Running` when this returns, so it can be
    /// stopped or compensated through the handle's id right away.
    #[tracing::instrument(skip(self, payload, caller_context))]
    pub async fn launch_saga(
        &self,
        saga_type: &str,
        payload: serde_json::Value,
        caller_context: Option<CallerContext>,
    ) -> Result<SagaHandle> {
        let (definition, saga_id) = self.prepare(saga_type, payload, caller_context).await?;
        let orchestrator = self.clone();
        let join =
            tokio::spawn(async move { orchestrator.drive(definition.as_ref(), saga_id).await });
        Ok(SagaHandle { saga_id, join })
    }

    async fn prepare(
        &self,
        saga_type: &str,
        payload: serde_json::Value,
        caller_context: Option<CallerContext>,
    ) -> Result<(Arc<dyn SagaDefinition>, SagaId)> {
        if !self.is_started() {
            return Err(SagaError::NotStarted);
        }
        let definition = self
            .inner
            .definitions
            .read()
            .await
            .get(saga_type)
            .cloned()
            .ok_or_else(|| SagaError::SagaNotRegistered(saga_type.to_string()))?;

        let caller_context = caller_context.or_else(|| {
            self.inner
                .caller_context
                .as_ref()
                .and_then(|accessor| accessor.current())
        });
        let mut context = SagaExecutionContext::new(
            saga_type,
            definition.define_steps(),
            payload,
            &definition.options(),
            caller_context,
        );
        context.set_status(SagaStatus::Running);
        let saga_id = context.saga_id;
        // Recorded before the context is visible, so every later transition
        // of this instance is counted after its start.
        self.inner.recorder.started(&context).await;
        self.inner.contexts.insert(context).await;
        Ok((definition, saga_id))
    }

    async fn drive(
        &self,
        definition: &dyn SagaDefinition,
        saga_id: SagaId,
    ) -> Result<SagaExecutionContext> {
        self.executor(definition).run(saga_id).await
    }

    fn executor<'a>(&'a self, definition: &'a dyn SagaDefinition) -> StepExecutor<'a> {
        StepExecutor::new(
            definition,
            &self.inner.contexts,
            &self.inner.recorder,
            self.inner.config.record_late_results,
        )
    }

    /// Cancels a running saga. Returns false for unknown or non-running sagas.
    ///
    /// A step already in flight is not interrupted; its outcome is settled
    /// when it returns.
    #[tracing::instrument(skip(self))]
    pub async fn stop_saga(&self, saga_id: SagaId) -> bool {
        let cancelled = self
            .inner
            .contexts
            .update(saga_id, |ctx| {
                if !ctx.status.can_stop() {
                    return None;
                }
                ctx.set_status(SagaStatus::Cancelled);
                Some(ctx.clone())
            })
            .await
            .flatten();

        match cancelled {
            Some(ctx) => {
                self.inner
                    .recorder
                    .transitioned(SagaStatus::Running, &ctx)
                    .await;
                true
            }
            None => false,
        }
    }

    /// Alias of [`stop_saga`](Self::stop_saga).
    pub async fn cancel_saga(&self, saga_id: SagaId) -> bool {
        self.stop_saga(saga_id).await
    }

    /// Runs the compensation protocol on an instance, whatever its status.
    ///
    /// An instance that is already `Compensated` is returned unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn compensate_saga(&self, saga_id: SagaId) -> Result<SagaExecutionContext> {
        let context = self
            .inner
            .contexts
            .get(saga_id)
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        let definition = self
            .inner
            .definitions
            .read()
            .await
            .get(&context.saga_type)
            .cloned()
            .ok_or_else(|| SagaError::SagaNotRegistered(context.saga_type.clone()))?;

        if !definition.options().enable_compensation {
            return Err(SagaError::CompensationDisabled(context.saga_type));
        }
        if context.status == SagaStatus::Compensated {
            tracing::debug!(%saga_id, "saga already compensated");
            return Ok(context);
        }

        let (from, compensating) = self
            .inner
            .contexts
            .update(saga_id, |ctx| {
                let from = ctx.status;
                ctx.set_status(SagaStatus::Compensating);
                (from, ctx.clone())
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        self.inner
            .recorder
            .transitioned(from, &compensating)
            .await;

        self.executor(definition.as_ref()).compensate(saga_id).await
    }

    pub async fn get_saga_status(&self, saga_id: SagaId) -> Option<SagaExecutionContext> {
        self.inner.contexts.get(saga_id).await
    }

    /// All tracked instances, oldest first.
    pub async fn get_all_saga_statuses(&self) -> Vec<SagaExecutionContext> {
        let mut contexts = self.inner.contexts.all().await;
        contexts.sort_by_key(|ctx| ctx.start_time);
        contexts
    }

    // -- Statistics & events --

    pub async fn get_statistics(&self) -> SagaStatistics {
        self.inner.recorder.statistics().await
    }

    /// Recomputes time buckets and the active-saga gauge.
    pub async fn refresh_statistics(&self) {
        let active = self
            .inner
            .contexts
            .all()
            .await
            .iter()
            .filter(|ctx| {
                matches!(
                    ctx.status,
                    SagaStatus::Running | SagaStatus::Compensating
                )
            })
            .count() as u64;
        self.inner.recorder.refresh_statistics(active).await;
        metrics::gauge!("saga_active").set(active as f64);
    }

    pub async fn register_event_handler(&self, handler: Arc<dyn SagaEventHandler>) {
        self.inner.recorder.dispatcher().register(handler).await;
    }

    pub async fn unregister_event_handler(&self, name: &str) -> bool {
        self.inner.recorder.dispatcher().unregister(name).await
    }

    // -- Lifecycle --

    /// Evicts terminal instances that ended longer ago than the retention
    /// window. Returns the number evicted.
    pub async fn sweep_expired_contexts(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.inner.config.context_retention) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };
        let evicted = self.inner.contexts.evict_terminal_before(cutoff).await;
        if evicted > 0 {
            tracing::info!(evicted, "evicted expired saga contexts");
        }
        evicted
    }

    /// Starts the periodic cleanup sweep and statistics refresh. Calling it
    /// on a started orchestrator does nothing.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let config = &self.inner.config;
        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(spawn_periodic(
            Arc::downgrade(&self.inner),
            config.cleanup_interval,
            |orchestrator| async move {
                orchestrator.sweep_expired_contexts().await;
            },
        ));
        tasks.push(spawn_periodic(
            Arc::downgrade(&self.inner),
            config.statistics_refresh_interval,
            |orchestrator| async move {
                orchestrator.refresh_statistics().await;
            },
        ));
        tracing::info!(
            cleanup_interval = ?config.cleanup_interval,
            statistics_refresh_interval = ?config.statistics_refresh_interval,
            "saga orchestrator started"
        );
    }

    /// Stops background tasks, cancels every running instance and clears the
    /// instance table.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }

        let cancelled = self
            .inner
            .contexts
            .update_all(|ctx| {
                if !ctx.status.can_stop() {
                    return None;
                }
                ctx.set_status(SagaStatus::Cancelled);
                Some(ctx.clone())
            })
            .await;
        for ctx in &cancelled {
            self.inner
                .recorder
                .transitioned(SagaStatus::Running, ctx)
                .await;
        }
        self.inner.contexts.clear().await;

        tracing::info!(cancelled = cancelled.len(), "saga orchestrator stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// True iff the orchestrator is started.
    pub fn health_check(&self) -> bool {
        self.is_started()
    }
}

impl Default for SagaOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

/// Runs `tick` every `period` for as long as the orchestrator is alive.
fn spawn_periodic<F, Fut>(inner: Weak<Inner>, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(SagaOrchestrator) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            tick(SagaOrchestrator { inner }).await;
        }
    })
}
