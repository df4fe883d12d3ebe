use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use forgebi_core::SystemClock;
use forgebi_events::{AnalyticsEvent, InMemoryEventBus, SharedBus};
use forgebi_insights::{InsightConfig, InsightEngine};
use forgebi_metrics::{MetricCategory, MetricObservation, MetricStore};

fn store() -> Arc<MetricStore> {
    let bus: SharedBus = Arc::new(InMemoryEventBus::<AnalyticsEvent>::new());
    Arc::new(MetricStore::new(bus, Arc::new(SystemClock)))
}

fn observation(i: usize, value: f64) -> MetricObservation {
    MetricObservation::new(format!("kpi_{i}"), value, "USD", MetricCategory::Sales)
}

/// Upsert throughput for a batch of distinct metrics.
fn bench_metric_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("metric_upsert");

    for metrics in [10usize, 1_000] {
        group.throughput(Throughput::Elements(metrics as u64));
        group.bench_with_input(BenchmarkId::new("distinct_ids", metrics), &metrics, |b, &n| {
            let store = store();
            let mut round = 0u64;
            b.iter(|| {
                round += 1;
                for i in 0..n {
                    let _ = black_box(store.upsert(observation(i, (round + i as u64) as f64)));
                }
            });
        });
    }

    group.finish();
}

/// Full scan over a store where a tenth of the metrics moved past the threshold.
fn bench_insight_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("insight_scan");

    for metrics in [100usize, 5_000] {
        let store = store();
        for i in 0..metrics {
            let _ = store.upsert(observation(i, 100.0));
            let next = if i % 10 == 0 { 150.0 } else { 101.0 };
            let _ = store.upsert(observation(i, next));
        }
        let bus: SharedBus = Arc::new(InMemoryEventBus::<AnalyticsEvent>::new());

        group.throughput(Throughput::Elements(metrics as u64));
        group.bench_with_input(BenchmarkId::new("snapshot_and_rules", metrics), &metrics, |b, _| {
            b.iter(|| {
                // Fresh engine per iteration so dedup does not short-circuit.
                let engine = InsightEngine::new(
                    store.clone(),
                    InsightConfig::default(),
                    bus.clone(),
                    Arc::new(SystemClock),
                );
                black_box(engine.scan())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_metric_upsert, bench_insight_scan);
criterion_main!(benches);
