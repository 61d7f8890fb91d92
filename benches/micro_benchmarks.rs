//! # Micro Benchmarks
//!
//! Per-call costs of the building blocks: clocks, token accounting,
//! permit bookkeeping, metrics and configuration.
//!
//! Run with: `cargo bench --bench micro_benchmarks`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use throttle::{
    Clock, ConcurrencyGate, ManualClock, MonotonicClock, Policy, RateLimiter, RateLimiterBuilder,
    TokenBucket,
};

/// Benchmark time sources
fn bench_clocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("clocks");

    group.bench_function("monotonic_now", |b| {
        let clock = MonotonicClock;
        b.iter(|| black_box(clock.now()));
    });

    group.bench_function("manual_now", |b| {
        let clock = ManualClock::new();
        b.iter(|| black_box(clock.now()));
    });

    group.bench_function("dyn_clock_now", |b| {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock);
        b.iter(|| black_box(clock.now()));
    });

    group.finish();
}

/// Benchmark available_tokens with different fill levels
fn bench_available_tokens(c: &mut Criterion) {
    let mut group = c.benchmark_group("available_tokens");

    for (name, drained) in [("full_bucket", 0u64), ("half_full_bucket", 50), ("empty_bucket", 100)] {
        group.bench_function(name, |b| {
            let bucket = TokenBucket::new(100, 1e-6).unwrap();
            let _ = bucket.try_consume(drained);
            b.iter(|| black_box(bucket.available_tokens()));
        });
    }

    group.finish();
}

/// Benchmark warm-up credit against plain credit
fn bench_refill_calculations(c: &mut Criterion) {
    let mut group = c.benchmark_group("refill_calc");

    for warmup in [None, Some(Duration::from_secs(1)), Some(Duration::from_secs(3600))] {
        let label = match warmup {
            None => "plain".to_string(),
            Some(w) => format!("warmup_{}s", w.as_secs()),
        };

        group.bench_with_input(BenchmarkId::from_parameter(label), &warmup, |b, &warmup| {
            let clock = ManualClock::shared();
            let mut policy = Policy::token_bucket(1_000_000, 1_000.0);
            policy.warmup = warmup;
            let bucket = TokenBucket::from_policy(&policy, clock.clone()).unwrap();

            b.iter(|| {
                clock.advance(Duration::from_micros(100));
                black_box(bucket.refill())
            });
        });
    }

    group.finish();
}

/// Benchmark is_inactive checks
fn bench_is_inactive(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_inactive");

    group.bench_function("token_bucket", |b| {
        let limiter = RateLimiter::new(Policy::token_bucket(100, 10.0)).unwrap();
        let _ = limiter.try_acquire();
        b.iter(|| black_box(limiter.is_idle(Duration::from_secs(1))));
    });

    group.bench_function("concurrency_gate", |b| {
        let limiter = RateLimiter::new(Policy::concurrency(10)).unwrap();
        b.iter(|| black_box(limiter.is_idle(Duration::ZERO)));
    });

    group.finish();
}

/// Benchmark permit acquisition and release bookkeeping
fn bench_permit_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("permit");

    group.bench_function("drop_release", |b| {
        let gate = ConcurrencyGate::new(1).unwrap();
        b.iter(|| drop(black_box(gate.try_acquire())));
    });

    group.bench_function("explicit_release", |b| {
        let gate = ConcurrencyGate::new(1).unwrap();
        b.iter(|| {
            if let Some(permit) = gate.try_acquire().into_permit() {
                black_box(gate.release(permit)).ok();
            }
        });
    });

    group.bench_function("acquire_uncontended", |b| {
        let gate = ConcurrencyGate::new(1).unwrap();
        b.iter(|| drop(black_box(gate.acquire(Duration::from_millis(1)))));
    });

    group.finish();
}

/// Benchmark metrics calculation
fn bench_metrics_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_calc");

    let scenarios = [
        ("no_activity", 0u64, 0u64),
        ("all_success", 1000, 0),
        ("mixed_50_50", 500, 500),
        ("high_rejection", 100, 900),
    ];

    for (name, acquired, rejected) in scenarios {
        group.bench_function(name, |b| {
            let limiter = RateLimiter::new(Policy::token_bucket(acquired.max(1), 1e-6)).unwrap();

            for _ in 0..acquired {
                let _ = limiter.try_acquire();
            }
            while limiter.try_acquire().is_allowed() {}
            for _ in 0..rejected {
                let _ = limiter.try_acquire();
            }

            b.iter(|| {
                let metrics = limiter.metrics();
                black_box((metrics.success_rate(), metrics.health_status()))
            });
        });
    }

    group.finish();
}

/// Benchmark configuration validation
fn bench_config_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_validation");

    group.bench_function("valid_policy", |b| {
        b.iter(|| black_box(Policy::token_bucket(100, 10.0).validate()));
    });

    group.bench_function("invalid_policy", |b| {
        b.iter(|| black_box(Policy::token_bucket(0, 10.0).validate()));
    });

    group.bench_function("steady_rate", |b| {
        let policy = Policy::per_minute(600);
        b.iter(|| black_box(policy.steady_rate_per_second()));
    });

    group.finish();
}

/// Benchmark builder pattern
fn bench_builder_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("builder");

    group.bench_function("builder_create", |b| {
        b.iter(|| {
            let limiter = RateLimiterBuilder::new()
                .capacity(100)
                .rate(10.0)
                .warmup(Duration::from_secs(1))
                .build();
            black_box(limiter)
        });
    });

    group.finish();
}

criterion_group!(
    micro_benches,
    bench_clocks,
    bench_available_tokens,
    bench_refill_calculations,
    bench_is_inactive,
    bench_permit_lifecycle,
    bench_metrics_calculation,
    bench_config_validation,
    bench_builder_pattern,
);

criterion_main!(micro_benches);
