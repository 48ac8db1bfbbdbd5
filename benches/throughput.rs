//! Throughput Benchmark for tickermap
//!
//! This benchmark measures the timer index under registration, rescheduling
//! and deletion churn, and how fast a tick drains due timers.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::time::Duration;
use tickermap::{run_tick, Callback, ExpiryConfig, TimerIndex};
use tokio::time::Instant;

const PREFILL: u64 = 10_000;

fn prefilled(base: Instant) -> TimerIndex<u64> {
    let index = TimerIndex::new();
    for i in 0..PREFILL {
        index.register(i, base + Duration::from_millis(i), Callback::noop());
    }
    index
}

/// Benchmark first-time registrations
fn bench_register(c: &mut Criterion) {
    let base = Instant::now() + Duration::from_secs(3600);

    let mut group = c.benchmark_group("register");
    group.throughput(Throughput::Elements(1));

    group.bench_function("register_new", |b| {
        let index = TimerIndex::new();
        let mut i = 0u64;
        b.iter(|| {
            index.register(i, base + Duration::from_millis(i % 10_000), Callback::noop());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark rescheduling existing keys
fn bench_reschedule(c: &mut Criterion) {
    let base = Instant::now() + Duration::from_secs(3600);

    let mut group = c.benchmark_group("reschedule");
    group.throughput(Throughput::Elements(1));

    // Later: O(log n), no heap work at all
    group.bench_function("reschedule_later", |b| {
        let index = prefilled(base);
        let mut offset = 0u64;
        b.iter(|| {
            offset += 1;
            let key = offset % PREFILL;
            index.register(key, base + Duration::from_secs(offset), Callback::noop());
        });
    });

    // Earlier: linear removal scan plus a push
    group.bench_function("reschedule_earlier", |b| {
        b.iter_batched(
            || prefilled(base),
            |index| {
                index.register(PREFILL - 1, base - Duration::from_secs(1), Callback::noop());
                black_box(index)
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark unregister and lookup
fn bench_unregister(c: &mut Criterion) {
    let base = Instant::now() + Duration::from_secs(3600);

    let mut group = c.benchmark_group("unregister");
    group.throughput(Throughput::Elements(1));

    group.bench_function("lookup_existing", |b| {
        let index = prefilled(base);
        let mut i = 0u64;
        b.iter(|| {
            black_box(index.lookup(&(i % PREFILL)));
            i += 1;
        });
    });

    group.bench_function("unregister_register", |b| {
        let index = TimerIndex::new();
        let mut i = 0u64;
        b.iter(|| {
            index.register(i % 1000, base, Callback::noop());
            black_box(index.unregister(&(i % 1000)));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark draining due timers in a single tick
fn bench_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build runtime");
    let config = ExpiryConfig::default();

    let mut group = c.benchmark_group("tick");
    group.throughput(Throughput::Elements(PREFILL));
    group.sample_size(20);

    group.bench_function("drain_due", |b| {
        b.iter_batched(
            || prefilled(Instant::now() - Duration::from_secs(60)),
            |index| rt.block_on(run_tick(&index, &config)),
            BatchSize::LargeInput,
        );
    });

    group.bench_function("drain_stale", |b| {
        b.iter_batched(
            || {
                let index = prefilled(Instant::now() - Duration::from_secs(60));
                for i in 0..PREFILL {
                    index.unregister(&i);
                }
                index
            },
            |index| rt.block_on(run_tick(&index, &config)),
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_register,
    bench_reschedule,
    bench_unregister,
    bench_tick
);
criterion_main!(benches);
