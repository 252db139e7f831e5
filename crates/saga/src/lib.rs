//! Saga orchestration engine.
//!
//! This crate runs long-lived business transactions as an ordered list of
//! steps. Each step may be undone by a compensating action; when a step
//! fails or the saga times out, previously completed steps are compensated
//! in reverse order.
//!
//! A [`SagaOrchestrator`] holds the registered [`SagaDefinition`]s and the
//! live [`SagaExecutionContext`] of every instance, keeps process-wide
//! [`SagaStatistics`] and publishes [`SagaLifecycleEvent`]s to registered
//! handlers.
//!
//! The bundled [`order_fulfillment`] saga follows these steps:
//! 1. Reserve inventory
//! 2. Process payment
//! 3. Create shipment

pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod events;
mod executor;
mod lifecycle;
pub mod orchestrator;
pub mod order_fulfillment;
pub mod services;
pub mod state;
pub mod statistics;
pub mod step;
pub mod table;

pub use common::{CallerContext, SagaId};
pub use config::OrchestratorConfig;
pub use context::{CallerContextAccessor, SagaExecutionContext};
pub use definition::{SagaDefinition, SagaOptions, StepOutcome, validate_definition};
pub use error::{Result, SagaError, StepError};
pub use events::{EventDispatcher, LifecycleEventType, SagaEventHandler, SagaLifecycleEvent};
pub use orchestrator::{SagaHandle, SagaOrchestrator};
pub use order_fulfillment::{OrderFulfillmentSaga, OrderPayload};
pub use services::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService, InventoryService,
    PaymentService, ReservationItem, ServiceError, ShippingService,
};
pub use state::{SagaStatus, StepStatus};
pub use statistics::{SagaStatistics, TimeBuckets};
pub use step::{SagaStep, StepType};
pub use table::ContextTable;
