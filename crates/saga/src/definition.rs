//! The saga definition contract implemented by business code.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::SagaExecutionContext;
use crate::error::{Result, SagaError, StepError};
use crate::step::SagaStep;

/// Outcome of a forward or compensating step invocation.
pub type StepOutcome = std::result::Result<serde_json::Value, StepError>;

/// Per-definition execution settings, copied into every instance at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaOptions {
    pub enable_compensation: bool,
    pub enable_timeout: bool,
    /// Deadline for the whole forward run.
    pub timeout: Duration,
    /// Upper bound on retries across all steps of one instance.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for SagaOptions {
    fn default() -> Self {
        Self {
            enable_compensation: true,
            enable_timeout: true,
            timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// A named, ordered list of steps together with how to run and undo them.
#[async_trait]
pub trait SagaDefinition: Send + Sync {
    /// The type name the saga is registered under.
    fn saga_type(&self) -> &str;

    fn options(&self) -> SagaOptions {
        SagaOptions::default()
    }

    /// The steps of a fresh instance. Called once per started saga.
    fn define_steps(&self) -> Vec<SagaStep>;

    /// Performs the forward work of `step`.
    async fn execute_step(&self, step: &SagaStep, context: &SagaExecutionContext) -> StepOutcome;

    /// Undoes the work of a previously completed `step`.
    async fn execute_compensation_step(
        &self,
        step: &SagaStep,
        context: &SagaExecutionContext,
    ) -> StepOutcome;

    /// Returning false marks the step `Skipped` instead of executing it.
    fn should_execute_step(&self, _step: &SagaStep, _context: &SagaExecutionContext) -> bool {
        true
    }

    fn validate(&self) -> Result<()> {
        validate_definition(self.saga_type(), &self.define_steps())
    }
}

/// Checks a definition's name and steps.
///
/// The type name must be non-blank and at least one step must be defined.
/// Step ids must be non-blank and unique, and no two steps may share an
/// `order`.
pub fn validate_definition(saga_type: &str, steps: &[SagaStep]) -> Result<()> {
    let invalid = |reason: String| SagaError::InvalidDefinition {
        saga_type: saga_type.to_string(),
        reason,
    };

    if saga_type.trim().is_empty() {
        return Err(invalid("saga type must not be empty".to_string()));
    }
    if steps.is_empty() {
        return Err(invalid("at least one step must be defined".to_string()));
    }

    let mut ids = HashSet::new();
    let mut orders = HashSet::new();
    for step in steps {
        if step.step_id.trim().is_empty() {
            return Err(invalid(format!(
                "step with order {} has an empty id",
                step.order
            )));
        }
        if !ids.insert(step.step_id.as_str()) {
            return Err(invalid(format!("duplicate step id '{}'", step.step_id)));
        }
        if !orders.insert(step.order) {
            return Err(invalid(format!(
                "duplicate step order {} on '{}'",
                step.order, step.step_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(orders: &[(&str, u32)]) -> Vec<SagaStep> {
        orders
            .iter()
            .map(|(id, order)| SagaStep::new(*id, *id, *order))
            .collect()
    }

    #[test]
    fn test_valid_definition() {
        assert!(validate_definition("Order", &steps(&[("a", 1), ("b", 2)])).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = validate_definition("  ", &steps(&[("a", 1)])).unwrap_err();
        assert!(matches!(err, SagaError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_no_steps_rejected() {
        let err = validate_definition("Order", &[]).unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_duplicate_order_rejected() {
        let err = validate_definition("Order", &steps(&[("a", 1), ("b", 1)])).unwrap_err();
        assert!(err.to_string().contains("duplicate step order 1"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = validate_definition("Order", &steps(&[("a", 1), ("a", 2)])).unwrap_err();
        assert!(err.to_string().contains("duplicate step id 'a'"));
    }

    #[test]
    fn test_blank_step_id_rejected() {
        let err = validate_definition("Order", &steps(&[("", 1)])).unwrap_err();
        assert!(err.to_string().contains("empty id"));
    }

    #[test]
    fn test_default_options() {
        let options = SagaOptions::default();
        assert!(options.enable_compensation);
        assert!(options.enable_timeout);
        assert_eq!(options.timeout, Duration::from_secs(300));
        assert_eq!(options.max_retries, 3);
    }
}
