//! Hot-path operation benchmarks.
//!
//! Run with `cargo bench --bench ops`.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shelflife::config::CacheBuilder;
use shelflife::policy::EvictionPolicyChoice;
use shelflife::Cache;

fn prefilled(entries: u64) -> Cache<u64, u64> {
    let cache = CacheBuilder::new()
        .eviction_policy(EvictionPolicyChoice::None)
        .expected_size(entries as usize)
        .build()
        .unwrap();
    for key in 0..entries {
        cache.put(key, key * 2).unwrap();
    }
    cache
}

fn bench_get_hit(c: &mut Criterion) {
    let cache = prefilled(10_000);
    let mut key = 0u64;
    c.bench_function("get_hit", |b| {
        b.iter(|| {
            key = (key + 1) % 10_000;
            black_box(cache.get(&key).unwrap())
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    let cache = prefilled(10_000);
    c.bench_function("get_miss", |b| {
        b.iter(|| black_box(cache.get(&u64::MAX).unwrap()))
    });
}

fn bench_put_overwrite(c: &mut Criterion) {
    let cache = prefilled(10_000);
    let mut key = 0u64;
    c.bench_function("put_overwrite", |b| {
        b.iter(|| {
            key = (key + 1) % 10_000;
            black_box(cache.put(key, key).unwrap())
        })
    });
}

fn bench_put_insert_bounded(c: &mut Criterion) {
    let cache: Cache<u64, u64> = CacheBuilder::new()
        .expected_size(100_000)
        .eviction_policy(EvictionPolicyChoice::Lfu)
        .build()
        .unwrap();
    let mut key = 0u64;
    c.bench_function("put_insert_bounded", |b| {
        b.iter(|| {
            key += 1;
            black_box(cache.put(key, key).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_get_miss,
    bench_put_overwrite,
    bench_put_insert_bounded
);
criterion_main!(benches);
