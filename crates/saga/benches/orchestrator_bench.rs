use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use saga::order_fulfillment::{OrderFulfillmentSaga, OrderPayload, SAGA_TYPE};
use saga::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService,
    OrchestratorConfig, ReservationItem, SagaOptions, SagaOrchestrator,
};

struct Fixture {
    orchestrator: SagaOrchestrator,
    payment: InMemoryPaymentService,
}

async fn fixture() -> Fixture {
    let payment = InMemoryPaymentService::new();
    let saga = OrderFulfillmentSaga::new(
        InMemoryInventoryService::new(),
        payment.clone(),
        InMemoryShippingService::new(),
    )
    .with_options(SagaOptions {
        retry_delay: Duration::ZERO,
        ..SagaOptions::default()
    });

    let orchestrator = SagaOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register_saga(Arc::new(saga)).await.unwrap();
    orchestrator.start().await;
    Fixture {
        orchestrator,
        payment,
    }
}

fn order_payload() -> serde_json::Value {
    serde_json::to_value(OrderPayload {
        order_id: "order-bench".to_string(),
        customer_id: "cust-bench".to_string(),
        amount_cents: 4200,
        items: vec![ReservationItem {
            sku: "SKU-BENCH".to_string(),
            quantity: 1,
        }],
    })
    .unwrap()
}

fn bench_order_fulfillment_completed(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let fixture = rt.block_on(fixture());
    let payload = order_payload();

    c.bench_function("saga/order_fulfillment_completed", |b| {
        b.iter(|| {
            rt.block_on(async {
                fixture
                    .orchestrator
                    .start_saga(SAGA_TYPE, payload.clone(), None)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_order_fulfillment_compensated(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let fixture = rt.block_on(fixture());
    fixture.payment.set_fail_on_charge(true);
    let payload = order_payload();

    c.bench_function("saga/order_fulfillment_payment_declined", |b| {
        b.iter(|| {
            rt.block_on(async {
                fixture
                    .orchestrator
                    .start_saga(SAGA_TYPE, payload.clone(), None)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_status_listing_1000_sagas(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let fixture = rt.block_on(fixture());
    let payload = order_payload();
    rt.block_on(async {
        for _ in 0..1000 {
            fixture
                .orchestrator
                .start_saga(SAGA_TYPE, payload.clone(), None)
                .await
                .unwrap();
        }
    });

    c.bench_function("saga/list_1000_statuses", |b| {
        b.iter(|| {
            rt.block_on(async {
                fixture.orchestrator.get_all_saga_statuses().await;
            });
        });
    });
}

criterion_group!(
    benches,
    bench_order_fulfillment_completed,
    bench_order_fulfillment_compensated,
    bench_status_listing_1000_sagas,
);
criterion_main!(benches);
