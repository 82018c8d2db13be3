use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use outbox_broker::InMemoryBroker;
use outbox_core::{Message, RetrialPolicy};
use outbox_infra::{InMemoryRecordStore, Publisher, RecordProcessor};

fn seeded_store(rt: &Runtime, records: usize) -> InMemoryRecordStore {
    let store = InMemoryRecordStore::new();
    let publisher = Publisher::new(store.clone());
    rt.block_on(async {
        let mut tx = store.begin();
        for i in 0..records {
            publisher
                .send(
                    Message::new("bench", format!("key-{i}"), vec![0u8; 256]),
                    &mut tx,
                )
                .await
                .expect("publish");
        }
        tx.commit().expect("commit");
    });
    store
}

/// One processor tick over a backlog of pending records.
fn bench_process_backlog(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("process_records");

    for backlog in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(BenchmarkId::from_parameter(backlog), &backlog, |b, &n| {
            b.iter_batched(
                || {
                    let store = seeded_store(&rt, n);
                    RecordProcessor::new(
                        store,
                        Arc::new(InMemoryBroker::new()),
                        "bench",
                        RetrialPolicy::unlimited(),
                    )
                },
                |processor| {
                    rt.block_on(processor.process_records()).expect("tick");
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Transactional publish cost, single record per transaction.
fn bench_publish(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let store = InMemoryRecordStore::new();
    let publisher = Publisher::new(store.clone());

    c.bench_function("publish_single", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut tx = store.begin();
                publisher
                    .send(Message::new("bench", "key", vec![0u8; 256]), &mut tx)
                    .await
                    .expect("publish");
                tx.commit().expect("commit");
            })
        });
    });
}

criterion_group!(benches, bench_process_backlog, bench_publish);
criterion_main!(benches);
