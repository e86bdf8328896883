//! Correlation and dispatch benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use paws_client::{CorrelationTable, Dispatcher, SubscriptionHandler, Update};
use paws_protocol::{Resource, Response};
use std::sync::Arc;
use tokio::sync::oneshot;

fn bench_one_shot_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("one_shot_round_trip");

    // Cost of register + resolve with `pending` unrelated entries in the table.
    for pending in [0usize, 100, 10_000] {
        let table = Arc::new(CorrelationTable::new());
        let mut parked = Vec::with_capacity(pending);
        for i in 0..pending {
            let (tx, rx) = oneshot::channel();
            table.register_one_shot(format!("parked-{}", i), tx).unwrap();
            parked.push(rx);
        }
        let dispatcher = Dispatcher::new(table.clone());

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(pending), &pending, |b, _| {
            b.iter(|| {
                let (tx, mut rx) = oneshot::channel();
                table.register_one_shot("hot", tx).unwrap();
                dispatcher.dispatch(Response::new("hot", 200));
                black_box(rx.try_recv().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_subscription_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscription_delivery");

    for size in [10, 1000] {
        let table = Arc::new(CorrelationTable::new());
        let handler: Arc<dyn SubscriptionHandler> = Arc::new(|update: Update| {
            black_box(update);
        });
        let (ack, _ack_rx) = oneshot::channel();
        table
            .register_subscription("sub", Resource::feed(42), handler, ack)
            .unwrap();
        let dispatcher = Dispatcher::new(table);
        dispatcher.dispatch(Response::new("sub", 200));

        let body = serde_json::json!({ "id": 42, "title": "x".repeat(size) }).to_string();
        let frame = Response::new("sub", 200).with_body(body);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(dispatcher.dispatch(frame.clone())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_one_shot_round_trip, bench_subscription_delivery);
criterion_main!(benches);
