//! Shipping service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::ServiceError;

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Creates a shipment for an order, returning its tracking number.
    async fn create_shipment(&self, order_id: &str) -> Result<String, ServiceError>;

    /// Cancels a previously created shipment.
    async fn cancel_shipment(&self, tracking_number: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<String, String>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory shipping service for demos and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<Mutex<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut InMemoryShippingState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn set_fail_on_create(&self, fail: bool) {
        self.with_state(|s| s.fail_on_create = fail);
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        self.with_state(|s| s.shipments.len())
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn create_shipment(&self, order_id: &str) -> Result<String, ServiceError> {
        self.with_state(|state| {
            if state.fail_on_create {
                return Err(ServiceError::Shipping("Shipping unavailable".to_string()));
            }
            state.next_id += 1;
            let tracking_number = format!("TRACK-{:04}", state.next_id);
            state
                .shipments
                .insert(tracking_number.clone(), order_id.to_string());
            Ok(tracking_number)
        })
    }

    async fn cancel_shipment(&self, tracking_number: &str) -> Result<(), ServiceError> {
        self.with_state(|state| {
            state.shipments.remove(tracking_number);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_cancel_shipment() {
        let service = InMemoryShippingService::new();

        let first = service.create_shipment("order-1").await.unwrap();
        let second = service.create_shipment("order-2").await.unwrap();
        assert_eq!(first, "TRACK-0001");
        assert_eq!(second, "TRACK-0002");

        service.cancel_shipment(&first).await.unwrap();
        assert_eq!(service.shipment_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_create() {
        let service = InMemoryShippingService::new();
        service.set_fail_on_create(true);
        assert!(service.create_shipment("order-1").await.is_err());
        assert_eq!(service.shipment_count(), 0);
    }
}
