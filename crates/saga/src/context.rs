//! Saga execution contexts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{CallerContext, SagaId};
use serde::{Deserialize, Serialize};

use crate::definition::SagaOptions;
use crate::state::{SagaStatus, StepStatus};
use crate::step::SagaStep;

/// The live record of one saga instance.
///
/// Holds an independent copy of the definition's steps, sorted by `order`,
/// so every instance can track its own step outcomes. Retrying steps without
/// their own delay inherit the definition's `retry_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaExecutionContext {
    pub saga_id: SagaId,
    pub saga_type: String,
    pub status: SagaStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_step_index: usize,
    pub steps: Vec<SagaStep>,
    pub data: serde_json::Value,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub enable_compensation: bool,
    pub enable_timeout: bool,
    pub caller_context: Option<CallerContext>,
}

impl SagaExecutionContext {
    pub fn new(
        saga_type: impl Into<String>,
        mut steps: Vec<SagaStep>,
        data: serde_json::Value,
        options: &SagaOptions,
        caller_context: Option<CallerContext>,
    ) -> Self {
        steps.sort_by_key(|step| step.order);
        for step in steps
            .iter_mut()
            .filter(|s| s.max_retries > 0 && s.retry_delay.is_zero())
        {
            step.retry_delay = options.retry_delay;
        }
        Self {
            saga_id: SagaId::new(),
            saga_type: saga_type.into(),
            status: SagaStatus::NotStarted,
            start_time: Utc::now(),
            end_time: None,
            current_step_index: 0,
            steps,
            data,
            error: None,
            retry_count: 0,
            max_retries: options.max_retries,
            timeout: options.timeout,
            enable_compensation: options.enable_compensation,
            enable_timeout: options.enable_timeout,
            caller_context,
        }
    }

    /// Moves the context to `status`, stamping `end_time` on terminal states
    /// and clearing it otherwise.
    pub(crate) fn set_status(&mut self, status: SagaStatus) {
        self.status = status;
        self.end_time = status.is_terminal().then(Utc::now);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn current_step(&self) -> Option<&SagaStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn step(&self, step_id: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    pub(crate) fn step_mut(&mut self, step_id: &str) -> Option<&mut SagaStep> {
        self.steps.iter_mut().find(|step| step.step_id == step_id)
    }

    /// Steps that completed forward execution and are eligible for
    /// compensation, last-completed first.
    pub fn compensable_steps(&self) -> Vec<&SagaStep> {
        let last = self
            .current_step_index
            .min(self.steps.len().saturating_sub(1));
        self.steps
            .iter()
            .take(last + 1)
            .filter(|step| step.status == StepStatus::Completed)
            .rev()
            .collect()
    }

    /// Step ids in forward completion order.
    pub fn completed_step_ids(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| {
                matches!(
                    step.status,
                    StepStatus::Completed | StepStatus::Compensating | StepStatus::Compensated
                )
            })
            .map(|step| step.step_id.as_str())
            .collect()
    }

    /// Steps whose compensation was attempted and failed.
    pub fn failed_compensations(&self) -> Vec<&SagaStep> {
        self.steps
            .iter()
            .filter(|step| step.compensation_failed())
            .collect()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.caller_context.as_ref()?.tenant_id()
    }

    /// Elapsed time between start and end, once terminal.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// The instant at which the saga deadline elapses, when timeouts are enabled.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if !self.enable_timeout {
            return None;
        }
        let timeout = chrono::Duration::from_std(self.timeout).ok()?;
        self.start_time.checked_add_signed(timeout)
    }
}

/// Read-only source of the current caller's tenant and user identifiers.
///
/// Consulted by the orchestrator when a saga is started without an explicit
/// caller context.
pub trait CallerContextAccessor: Send + Sync {
    fn current(&self) -> Option<CallerContext>;
}
