//! Saga error types.

use common::SagaId;
use thiserror::Error;

use crate::state::StepStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga definition failed validation at registration time.
    #[error("Invalid saga definition '{saga_type}': {reason}")]
    InvalidDefinition { saga_type: String, reason: String },

    /// The orchestrator has not been started.
    #[error("Saga orchestrator is not started")]
    NotStarted,

    /// No definition is registered for the requested saga type.
    #[error("Saga type not registered: {0}")]
    SagaNotRegistered(String),

    /// No execution context exists for the saga ID.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// Compensation was requested for a saga type that disables it.
    #[error("Compensation is disabled for saga type '{0}'")]
    CompensationDisabled(String),

    /// A step was asked to move backwards or skip a state.
    #[error("Invalid transition for step '{step}': {from} -> {to}")]
    InvalidStepTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    /// The task driving a launched saga ended abnormally.
    #[error("Saga task aborted: {0}")]
    Aborted(String),

    /// A lifecycle event handler failed.
    #[error("Event handler error: {0}")]
    Handler(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// A business-level failure returned by a step or its compensation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
