//! External service ports used by the order fulfillment saga, with in-memory
//! implementations.

pub mod inventory;
pub mod payment;
pub mod shipping;

use thiserror::Error;

use crate::error::StepError;

pub use inventory::{InMemoryInventoryService, InventoryService, ReservationItem};
pub use payment::{InMemoryPaymentService, PaymentService};
pub use shipping::{InMemoryShippingService, ShippingService};

/// Errors reported by the external services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Inventory service error: {0}")]
    Inventory(String),

    #[error("Payment service error: {0}")]
    Payment(String),

    #[error("Shipping service error: {0}")]
    Shipping(String),
}

impl From<ServiceError> for StepError {
    fn from(err: ServiceError) -> Self {
        StepError::new(err.to_string())
    }
}
