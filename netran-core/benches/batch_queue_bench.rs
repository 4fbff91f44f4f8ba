#[macro_use]
extern crate criterion;

use bytes::Bytes;
use criterion::Criterion;

use netran_core::{BatchQueue, CaptureBatch, Datalink};

fn bench_batch_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_queue_throughput");

    for capacity in [128, 1024, 10_000] {
        group.throughput(criterion::Throughput::Elements(1));
        group.bench_function(format!("capacity_{}", capacity), |b| {
            let queue = BatchQueue::with_capacity(capacity).unwrap();
            let payload = Bytes::from_static(&[0u8; 64]);
            b.iter(|| {
                let batch = CaptureBatch::new(payload.clone(), 64, 1, Datalink::ETHERNET);
                queue.try_push(batch).unwrap();
                queue.try_pop().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_batch_queue_push_pop);
criterion_main!(benches);
