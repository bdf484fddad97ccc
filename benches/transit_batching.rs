//! Throughput of the transit bus's batch-coalescing path (§4.3): how many
//! published messages per second a single `TransitEndpoint` can drain into
//! flushed batches under a couple of batching configurations.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fleethub::transit::{BatchConfig, BatchHandler, TransitEndpoint};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingHandler {
    received: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl BatchHandler<usize> for CountingHandler {
    async fn handle_batch(&self, batch: Vec<usize>) {
        self.received.fetch_add(batch.len(), Ordering::Relaxed);
    }
}

fn publish_n(rt: &tokio::runtime::Runtime, config: BatchConfig, n: usize) {
    rt.block_on(async move {
        let received = Arc::new(AtomicUsize::new(0));
        let endpoint = Arc::new(TransitEndpoint::spawn(config, Arc::new(CountingHandler { received: received.clone() })));
        for i in 0..n {
            endpoint.publish(i).await.unwrap();
        }
        while received.load(Ordering::Relaxed) < n {
            tokio::task::yield_now().await;
        }
    });
}

fn bench_transit_batching(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("transit_batching");

    let configs = [
        ("immediate", BatchConfig::immediate()),
        ("small_batch_fast_delay", BatchConfig::new(32, Duration::from_millis(5))),
        ("large_batch_slow_delay", BatchConfig::new(256, Duration::from_millis(50))),
    ];

    for (name, config) in configs {
        group.bench_with_input(BenchmarkId::new("publish_1000", name), &config, |b, config| {
            b.iter(|| publish_n(&rt, *config, 1_000));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transit_batching);
criterion_main!(benches);
