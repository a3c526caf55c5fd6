use std::{hint::black_box, sync::Arc};

use criterion::{Criterion, criterion_group, criterion_main};

use tiergate::{EvictionIntervalMs, ManualTimeSource, RateLimit, RateLimiter, RateLimiterOptions};

fn opts(per_identifier: RateLimit, account: RateLimit) -> RateLimiterOptions {
    RateLimiterOptions {
        per_identifier_limit: per_identifier,
        account_limit: account,
        eviction_interval_ms: EvictionIntervalMs::default(),
    }
}

/// A limiter on a frozen clock, so a filled window stays full for the whole run.
fn frozen(options: RateLimiterOptions) -> RateLimiter<Arc<ManualTimeSource>> {
    RateLimiter::with_time_source(options, Arc::new(ManualTimeSource::default()))
}

fn bench_hot_identifier_admitted(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_and_record/hot_identifier_admitted");
    group.sample_size(200);

    group.bench_function("check", |b| {
        let rl = RateLimiter::new(opts(RateLimit::max(), RateLimit::max()));
        rl.check("k");

        b.iter(|| {
            black_box(rl.check(black_box("k")));
        });
    });

    group.finish();
}

fn bench_many_identifiers_admitted(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_and_record/many_identifiers_admitted");
    group.sample_size(100);

    for identifier_space in [1_000_usize, 100_000] {
        group.bench_function(format!("check/identifiers={identifier_space}"), |b| {
            let rl = RateLimiter::new(opts(RateLimit::max(), RateLimit::max()));
            let identifiers: Vec<String> =
                (0..identifier_space).map(|i| format!("+1555{i:07}")).collect();
            let mut idx = 0_usize;

            b.iter(|| {
                idx = idx.wrapping_add(1);
                let identifier = &identifiers[idx % identifiers.len()];
                black_box(rl.check(black_box(identifier)));
            });
        });
    }

    group.finish();
}

fn bench_reject_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_and_record/reject_path");
    group.sample_size(200);

    group.bench_function("check/identifier_rejected", |b| {
        let rl = frozen(opts(RateLimit::try_from(10u64).unwrap(), RateLimit::max()));
        for _ in 0..20 {
            rl.check("k");
        }

        b.iter(|| {
            black_box(rl.check(black_box("k")));
        });
    });

    // Identifier increment succeeds, account denies, identifier is rolled back.
    group.bench_function("check/account_rejected_rollback", |b| {
        let rl = frozen(opts(RateLimit::max(), RateLimit::try_from(10u64).unwrap()));
        for _ in 0..20 {
            rl.check("filler");
        }

        b.iter(|| {
            black_box(rl.check(black_box("k")));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hot_identifier_admitted,
    bench_many_identifiers_admitted,
    bench_reject_paths
);
criterion_main!(benches);
