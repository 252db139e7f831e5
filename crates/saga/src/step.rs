//! Saga steps.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::state::StepStatus;

/// The kind of work a step represents.
///
/// Every kind is executed as a single sequential unit; `Parallel` fan-out is
/// left to the step implementation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepType {
    #[default]
    Command,
    Event,
    Compensation,
    Timeout,
    Condition,
    Parallel,
    Sequential,
}

/// One unit of forward work (and its paired undo) within a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: String,
    pub step_name: String,
    pub order: u32,
    pub step_type: StepType,
    pub status: StepStatus,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub attempts: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub compensation_command: Option<serde_json::Value>,
}

impl SagaStep {
    /// Creates a pending command step with no retries.
    pub fn new(step_id: impl Into<String>, step_name: impl Into<String>, order: u32) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            order,
            step_type: StepType::Command,
            status: StepStatus::Pending,
            timeout: None,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            attempts: 0,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            compensation_command: None,
        }
    }

    pub fn with_type(mut self, step_type: StepType) -> Self {
        self.step_type = step_type;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_compensation_command(mut self, command: serde_json::Value) -> Self {
        self.compensation_command = Some(command);
        self
    }

    /// Moves the step to `next`, rejecting backward or skipping moves.
    pub fn transition(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SagaError::InvalidStepTransition {
                step: self.step_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn mark_executing(&mut self) -> Result<()> {
        self.transition(StepStatus::Executing)?;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value) -> Result<()> {
        self.transition(StepStatus::Completed)?;
        self.end_time = Some(Utc::now());
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Failed)?;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    pub(crate) fn mark_skipped(&mut self) -> Result<()> {
        self.transition(StepStatus::Skipped)?;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// Returns true if a compensation attempt was made and failed.
    pub fn compensation_failed(&self) -> bool {
        self.status == StepStatus::Compensating && self.error.is_some()
    }

    /// Wall-clock time spent on the step, once it has finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_step_defaults() {
        let step = SagaStep::new("reserve", "Reserve stock", 1);
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.step_type, StepType::Command);
        assert_eq!(step.max_retries, 0);
        assert!(step.timeout.is_none());
        assert!(step.duration().is_none());
    }

    #[test]
    fn test_builders() {
        let step = SagaStep::new("charge", "Charge card", 2)
            .with_type(StepType::Condition)
            .with_timeout(Duration::from_secs(5))
            .with_retries(2, Duration::from_millis(100))
            .with_compensation_command(serde_json::json!({"refund": true}));
        assert_eq!(step.step_type, StepType::Condition);
        assert_eq!(step.timeout, Some(Duration::from_secs(5)));
        assert_eq!(step.max_retries, 2);
        assert_eq!(step.retry_delay, Duration::from_millis(100));
        assert!(step.compensation_command.is_some());
    }

    #[test]
    fn test_forward_lifecycle_records_timing() {
        let mut step = SagaStep::new("a", "A", 0);
        step.mark_executing().unwrap();
        assert!(step.start_time.is_some());
        step.mark_completed(serde_json::json!({"ok": 1})).unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.result, Some(serde_json::json!({"ok": 1})));
        assert!(step.duration().is_some());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut step = SagaStep::new("a", "A", 0);
        step.mark_executing().unwrap();
        step.mark_failed("boom").unwrap();

        let err = step.transition(StepStatus::Compensating).unwrap_err();
        assert!(matches!(
            err,
            SagaError::InvalidStepTransition {
                from: StepStatus::Failed,
                to: StepStatus::Compensating,
                ..
            }
        ));
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_compensation_failed_flag() {
        let mut step = SagaStep::new("a", "A", 0);
        step.mark_executing().unwrap();
        step.mark_completed(serde_json::Value::Null).unwrap();
        step.transition(StepStatus::Compensating).unwrap();
        assert!(!step.compensation_failed());
        step.error = Some("undo failed".to_string());
        assert!(step.compensation_failed());
    }
}
