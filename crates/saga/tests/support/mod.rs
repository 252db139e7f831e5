//! Test harness: a saga whose step behavior is scripted per step id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use saga::{
    LifecycleEventType, OrchestratorConfig, SagaDefinition, SagaError, SagaEventHandler,
    SagaExecutionContext, SagaId, SagaLifecycleEvent, SagaOptions, SagaOrchestrator, SagaStep,
    StepError, StepOutcome, StepStatus,
};
use serde_json::json;
use tokio::sync::Notify;

#[derive(Clone)]
enum Behavior {
    Fail,
    /// Fails while `attempts <= n`.
    FailTimes(u32),
    Delay(Duration),
    Gate(Arc<Notify>),
}

pub struct ScriptedSaga {
    saga_type: String,
    steps: Vec<SagaStep>,
    options: SagaOptions,
    behaviors: HashMap<String, Behavior>,
    failing_compensations: HashSet<String>,
    skipped: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSaga {
    /// Steps are ordered as given; every step succeeds unless scripted.
    pub fn new(saga_type: &str, step_ids: &[&str]) -> Self {
        Self {
            saga_type: saga_type.to_string(),
            steps: step_ids
                .iter()
                .zip(1..)
                .map(|(id, order)| SagaStep::new(*id, *id, order))
                .collect(),
            options: SagaOptions {
                timeout: Duration::from_secs(5),
                retry_delay: Duration::from_millis(1),
                ..SagaOptions::default()
            },
            behaviors: HashMap::new(),
            failing_compensations: HashSet::new(),
            skipped: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_options(mut self, options: SagaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn configure_step(mut self, step_id: &str, f: impl FnOnce(SagaStep) -> SagaStep) -> Self {
        if let Some(index) = self.steps.iter().position(|s| s.step_id == step_id) {
            let step = self.steps.remove(index);
            self.steps.insert(index, f(step));
        }
        self
    }

    pub fn failing(self, step_id: &str) -> Self {
        self.behave(step_id, Behavior::Fail)
    }

    pub fn failing_times(self, step_id: &str, times: u32) -> Self {
        self.behave(step_id, Behavior::FailTimes(times))
    }

    pub fn delayed(self, step_id: &str, delay: Duration) -> Self {
        self.behave(step_id, Behavior::Delay(delay))
    }

    /// The step blocks until `gate` is notified, then succeeds.
    pub fn gated(self, step_id: &str, gate: Arc<Notify>) -> Self {
        self.behave(step_id, Behavior::Gate(gate))
    }

    pub fn failing_compensation(mut self, step_id: &str) -> Self {
        self.failing_compensations.insert(step_id.to_string());
        self
    }

    pub fn skipping(mut self, step_id: &str) -> Self {
        self.skipped.insert(step_id.to_string());
        self
    }

    fn behave(mut self, step_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(step_id.to_string(), behavior);
        self
    }

    /// Every invocation so far, as `exec:<id>` or `comp:<id>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Step ids passed to compensation, in call order.
    pub fn compensations(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.strip_prefix("comp:"))
            .map(str::to_string)
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SagaDefinition for ScriptedSaga {
    fn saga_type(&self) -> &str {
        &self.saga_type
    }

    fn options(&self) -> SagaOptions {
        self.options.clone()
    }

    fn define_steps(&self) -> Vec<SagaStep> {
        self.steps.clone()
    }

    async fn execute_step(&self, step: &SagaStep, _context: &SagaExecutionContext) -> StepOutcome {
        self.record(format!("exec:{}", step.step_id));
        match self.behaviors.get(&step.step_id) {
            Some(Behavior::Fail) => return Err(StepError::new(format!("{} failed", step.step_id))),
            Some(Behavior::FailTimes(times)) if step.attempts <= *times => {
                return Err(StepError::new(format!(
                    "{} failed on attempt {}",
                    step.step_id, step.attempts
                )));
            }
            Some(Behavior::Delay(delay)) => tokio::time::sleep(*delay).await,
            Some(Behavior::Gate(gate)) => gate.notified().await,
            Some(Behavior::FailTimes(_)) | None => {}
        }
        Ok(json!({ "step": step.step_id, "attempt": step.attempts }))
    }

    async fn execute_compensation_step(
        &self,
        step: &SagaStep,
        _context: &SagaExecutionContext,
    ) -> StepOutcome {
        self.record(format!("comp:{}", step.step_id));
        if self.failing_compensations.contains(&step.step_id) {
            return Err(StepError::new(format!("cannot undo {}", step.step_id)));
        }
        Ok(json!({ "undone": step.step_id }))
    }

    fn should_execute_step(&self, step: &SagaStep, _context: &SagaExecutionContext) -> bool {
        !self.skipped.contains(&step.step_id)
    }
}

/// Collects every lifecycle event it is offered.
pub struct RecordingHandler {
    name: String,
    event_type: Option<LifecycleEventType>,
    events: Mutex<Vec<SagaLifecycleEvent>>,
}

impl RecordingHandler {
    pub fn new(name: &str, event_type: Option<LifecycleEventType>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            event_type,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<SagaLifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<LifecycleEventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl SagaEventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_type(&self) -> Option<LifecycleEventType> {
        self.event_type
    }

    async fn handle(&self, event: &SagaLifecycleEvent) -> Result<(), SagaError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A started orchestrator with `saga` registered.
pub async fn orchestrator_with(
    config: OrchestratorConfig,
    saga: Arc<ScriptedSaga>,
) -> SagaOrchestrator {
    let orchestrator = SagaOrchestrator::new(config);
    orchestrator.register_saga(saga).await.unwrap();
    orchestrator.start().await;
    orchestrator
}

/// Polls until `step_id` of `saga_id` reaches `status`.
pub async fn wait_for_step(
    orchestrator: &SagaOrchestrator,
    saga_id: SagaId,
    step_id: &str,
    status: StepStatus,
) {
    for _ in 0..1000 {
        let reached = orchestrator
            .get_saga_status(saga_id)
            .await
            .and_then(|ctx| ctx.step(step_id).map(|step| step.status == status))
            .unwrap_or(false);
        if reached {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("step '{step_id}' never reached {status}");
}

pub fn step_statuses(context: &SagaExecutionContext) -> Vec<StepStatus> {
    context.steps.iter().map(|step| step.status).collect()
}
