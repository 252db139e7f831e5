//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          ├──► Failed ───┬──► Compensating ──► Compensated
///                          ├──► Timeout ──┘
///                          └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Context created, executor not yet entered.
    #[default]
    NotStarted,

    /// Forward steps are being executed.
    Running,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed (terminal unless compensation follows).
    Failed,

    /// Stopped by an external caller (terminal state).
    Cancelled,

    /// Completed steps are being undone.
    Compensating,

    /// Compensation finished (terminal state).
    Compensated,

    /// The saga deadline elapsed (terminal unless compensation follows).
    Timeout,
}

impl SagaStatus {
    /// All statuses, in declaration order.
    pub const ALL: [SagaStatus; 8] = [
        SagaStatus::NotStarted,
        SagaStatus::Running,
        SagaStatus::Completed,
        SagaStatus::Failed,
        SagaStatus::Cancelled,
        SagaStatus::Compensating,
        SagaStatus::Compensated,
        SagaStatus::Timeout,
    ];

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed
                | SagaStatus::Failed
                | SagaStatus::Cancelled
                | SagaStatus::Compensated
                | SagaStatus::Timeout
        )
    }

    /// Returns true if an external stop request applies.
    pub fn can_stop(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::NotStarted => "NotStarted",
            SagaStatus::Running => "Running",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Cancelled => "Cancelled",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::Timeout => "Timeout",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of a single step within a saga instance.
///
/// Steps only move forward:
/// ```text
/// Pending ──► Executing ──┬──► Completed ──► Compensating ──► Compensated
///                         ├──► Failed
///                         └──► Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
    Skipped,
    Compensating,
    Compensated,
}

impl StepStatus {
    /// Returns true if `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Pending, Skipped)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Skipped)
                | (Completed, Compensating)
                | (Compensating, Compensated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Executing => "Executing",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Skipped => "Skipped",
            StepStatus::Compensating => "Compensating",
            StepStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
