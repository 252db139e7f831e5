//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ServiceError;

/// An item to reserve in inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub sku: String,
    pub quantity: u32,
}

/// Trait for inventory management operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for an order, returning the reservation ID.
    async fn reserve(
        &self,
        order_id: &str,
        items: &[ReservationItem],
    ) -> Result<String, ServiceError>;

    /// Releases a previously made reservation.
    async fn release(&self, reservation_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, (String, Vec<ReservationItem>)>,
    next_id: u32,
    fail_on_reserve: bool,
    fail_on_release: bool,
}

/// In-memory inventory service for demos and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut InMemoryInventoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Makes subsequent reserve calls fail.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.with_state(|s| s.fail_on_reserve = fail);
    }

    /// Makes subsequent release calls fail.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.with_state(|s| s.fail_on_release = fail);
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.with_state(|s| s.reservations.len())
    }

    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        self.with_state(|s| s.reservations.contains_key(reservation_id))
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        order_id: &str,
        items: &[ReservationItem],
    ) -> Result<String, ServiceError> {
        self.with_state(|state| {
            if state.fail_on_reserve {
                return Err(ServiceError::Inventory("Insufficient stock".to_string()));
            }
            state.next_id += 1;
            let reservation_id = format!("RES-{:04}", state.next_id);
            state
                .reservations
                .insert(reservation_id.clone(), (order_id.to_string(), items.to_vec()));
            Ok(reservation_id)
        })
    }

    async fn release(&self, reservation_id: &str) -> Result<(), ServiceError> {
        self.with_state(|state| {
            if state.fail_on_release {
                return Err(ServiceError::Inventory(format!(
                    "Cannot release {reservation_id}"
                )));
            }
            state.reservations.remove(reservation_id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widgets() -> Vec<ReservationItem> {
        vec![ReservationItem {
            sku: "SKU-001".to_string(),
            quantity: 2,
        }]
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let service = InMemoryInventoryService::new();

        let reservation_id = service.reserve("order-1", &widgets()).await.unwrap();
        assert_eq!(reservation_id, "RES-0001");
        assert!(service.has_reservation(&reservation_id));

        service.release(&reservation_id).await.unwrap();
        assert_eq!(service.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let service = InMemoryInventoryService::new();
        service.set_fail_on_reserve(true);
        assert!(service.reserve("order-1", &widgets()).await.is_err());

        service.set_fail_on_reserve(false);
        service.set_fail_on_release(true);
        let reservation_id = service.reserve("order-1", &widgets()).await.unwrap();
        assert!(matches!(
            service.release(&reservation_id).await,
            Err(ServiceError::Inventory(_))
        ));
        assert_eq!(service.reservation_count(), 1);
    }
}
