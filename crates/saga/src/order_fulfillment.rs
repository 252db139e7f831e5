//! Order fulfillment saga: reserve inventory, charge the customer, ship.
//!
//! If any step fails, previously completed steps are compensated in reverse
//! order: the shipment is cancelled, the payment refunded and the
//! reservation released.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::SagaExecutionContext;
use crate::definition::{SagaDefinition, SagaOptions, StepOutcome};
use crate::error::StepError;
use crate::services::{InventoryService, PaymentService, ReservationItem, ShippingService};
use crate::step::SagaStep;

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Step id: Reserve inventory for the order.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step id: Process payment for the order.
pub const STEP_PROCESS_PAYMENT: &str = "process_payment";

/// Step id: Create shipment for the order.
pub const STEP_CREATE_SHIPMENT: &str = "create_shipment";

/// The payload an order fulfillment saga is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub order_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub items: Vec<ReservationItem>,
}

/// Drives an order through inventory, payment and shipping services.
pub struct OrderFulfillmentSaga<I, P, Sh>
where
    I: InventoryService,
    P: PaymentService,
    Sh: ShippingService,
{
    inventory: I,
    payment: P,
    shipping: Sh,
    options: SagaOptions,
}

impl<I, P, Sh> OrderFulfillmentSaga<I, P, Sh>
where
    I: InventoryService,
    P: PaymentService,
    Sh: ShippingService,
{
    pub fn new(inventory: I, payment: P, shipping: Sh) -> Self {
        Self {
            inventory,
            payment,
            shipping,
            options: SagaOptions {
                timeout: Duration::from_secs(60),
                retry_delay: Duration::from_millis(200),
                ..SagaOptions::default()
            },
        }
    }

    pub fn with_options(mut self, options: SagaOptions) -> Self {
        self.options = options;
        self
    }

    fn payload(context: &SagaExecutionContext) -> Result<OrderPayload, StepError> {
        serde_json::from_value(context.data.clone())
            .map_err(|e| StepError::new(format!("invalid order payload: {e}")))
    }
}

/// Reads a string field from a completed step's result.
fn result_field<'a>(step: &'a SagaStep, field: &str) -> Result<&'a str, StepError> {
    step.result
        .as_ref()
        .and_then(|result| result.get(field))
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::new(format!("step '{}' has no {field}", step.step_id)))
}

#[async_trait]
impl<I, P, Sh> SagaDefinition for OrderFulfillmentSaga<I, P, Sh>
where
    I: InventoryService,
    P: PaymentService,
    Sh: ShippingService,
{
    fn saga_type(&self) -> &str {
        SAGA_TYPE
    }

    fn options(&self) -> SagaOptions {
        self.options.clone()
    }

    fn define_steps(&self) -> Vec<SagaStep> {
        vec![
            SagaStep::new(STEP_RESERVE_INVENTORY, "Reserve inventory", 1)
                .with_timeout(Duration::from_secs(10))
                .with_compensation_command(json!({ "action": "release_reservation" })),
            SagaStep::new(STEP_PROCESS_PAYMENT, "Process payment", 2)
                .with_timeout(Duration::from_secs(15))
                .with_retries(2, Duration::ZERO)
                .with_compensation_command(json!({ "action": "refund_payment" })),
            SagaStep::new(STEP_CREATE_SHIPMENT, "Create shipment", 3)
                .with_timeout(Duration::from_secs(10))
                .with_compensation_command(json!({ "action": "cancel_shipment" })),
        ]
    }

    #[tracing::instrument(skip_all, fields(saga_id = %context.saga_id, step = %step.step_id))]
    async fn execute_step(&self, step: &SagaStep, context: &SagaExecutionContext) -> StepOutcome {
        let order = Self::payload(context)?;
        match step.step_id.as_str() {
            STEP_RESERVE_INVENTORY => {
                if order.items.is_empty() {
                    return Err(StepError::new("order has no items"));
                }
                let reservation_id = self.inventory.reserve(&order.order_id, &order.items).await?;
                Ok(json!({ "reservation_id": reservation_id }))
            }
            STEP_PROCESS_PAYMENT => {
                let payment_id = self
                    .payment
                    .charge(&order.order_id, &order.customer_id, order.amount_cents)
                    .await?;
                Ok(json!({ "payment_id": payment_id, "amount_cents": order.amount_cents }))
            }
            STEP_CREATE_SHIPMENT => {
                let tracking_number = self.shipping.create_shipment(&order.order_id).await?;
                Ok(json!({ "tracking_number": tracking_number }))
            }
            other => Err(StepError::new(format!("unknown step '{other}'"))),
        }
    }

    #[tracing::instrument(skip_all, fields(saga_id = %context.saga_id, step = %step.step_id))]
    async fn execute_compensation_step(
        &self,
        step: &SagaStep,
        context: &SagaExecutionContext,
    ) -> StepOutcome {
        match step.step_id.as_str() {
            STEP_RESERVE_INVENTORY => {
                let reservation_id = result_field(step, "reservation_id")?;
                self.inventory.release(reservation_id).await?;
                Ok(json!({ "released": reservation_id }))
            }
            STEP_PROCESS_PAYMENT => {
                let payment_id = result_field(step, "payment_id")?;
                self.payment.refund(payment_id).await?;
                Ok(json!({ "refunded": payment_id }))
            }
            STEP_CREATE_SHIPMENT => {
                let tracking_number = result_field(step, "tracking_number")?;
                self.shipping.cancel_shipment(tracking_number).await?;
                Ok(json!({ "cancelled": tracking_number }))
            }
            other => Err(StepError::new(format!("unknown step '{other}'"))),
        }
    }
}
