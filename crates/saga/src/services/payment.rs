//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::ServiceError;

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges a customer, returning the payment ID.
    async fn charge(
        &self,
        order_id: &str,
        customer_id: &str,
        amount_cents: i64,
    ) -> Result<String, ServiceError>;

    /// Refunds a previously made payment.
    async fn refund(&self, payment_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (String, String, i64)>,
    next_id: u32,
    fail_on_charge: bool,
    fail_on_refund: bool,
}

/// In-memory payment service for demos and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut InMemoryPaymentState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn set_fail_on_charge(&self, fail: bool) {
        self.with_state(|s| s.fail_on_charge = fail);
    }

    pub fn set_fail_on_refund(&self, fail: bool) {
        self.with_state(|s| s.fail_on_refund = fail);
    }

    /// Returns the number of payments not yet refunded.
    pub fn payment_count(&self) -> usize {
        self.with_state(|s| s.payments.len())
    }

    /// Sum of all payments not yet refunded.
    pub fn captured_cents(&self) -> i64 {
        self.with_state(|s| s.payments.values().map(|(_, _, amount)| amount).sum())
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: &str,
        customer_id: &str,
        amount_cents: i64,
    ) -> Result<String, ServiceError> {
        if amount_cents <= 0 {
            return Err(ServiceError::Payment(format!(
                "Invalid amount: {amount_cents}"
            )));
        }
        self.with_state(|state| {
            if state.fail_on_charge {
                return Err(ServiceError::Payment("Payment declined".to_string()));
            }
            state.next_id += 1;
            let payment_id = format!("PAY-{:04}", state.next_id);
            state.payments.insert(
                payment_id.clone(),
                (order_id.to_string(), customer_id.to_string(), amount_cents),
            );
            Ok(payment_id)
        })
    }

    async fn refund(&self, payment_id: &str) -> Result<(), ServiceError> {
        self.with_state(|state| {
            if state.fail_on_refund {
                return Err(ServiceError::Payment(format!(
                    "Refund of {payment_id} rejected"
                )));
            }
            state.payments.remove(payment_id);
            Ok(())
        })
    }
}
