//! Bounded cache under pressure: the eviction worker keeps the size at
//! the configured capacity while writers keep inserting.
//!
//! Run with `cargo run --example bounded_eviction`.

use std::time::Duration;

use shelflife::config::CacheBuilder;
use shelflife::policy::EvictionPolicyChoice;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let cache = CacheBuilder::new()
        .id("bounded-demo")
        .expected_size(1_000)
        .eviction_policy(EvictionPolicyChoice::Lru)
        .build()
        .expect("valid configuration");

    for i in 0..10_000u64 {
        cache.put(i, format!("payload-{i}")).unwrap();
        // Re-read a small hot set so it survives eviction.
        let _ = cache.get(&(i % 16)).unwrap();
    }

    std::thread::sleep(Duration::from_millis(500));

    let stats = cache.statistics();
    println!(
        "size={} evicted={} rounds={} rate/min={}",
        stats.element_count, stats.eviction_count, stats.eviction_rounds, stats.eviction_rate
    );
    println!("hot key 3 still present: {}", cache.get(&3).unwrap().is_some());

    cache.close();
}
