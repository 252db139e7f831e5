//! Shared identifiers for the saga orchestration workspace.

mod types;

pub use types::{CallerContext, SagaId};
