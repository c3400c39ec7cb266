//! Basic cache usage: build, read, write, statistics.
//!
//! Run with `cargo run --example basic_usage`.

use std::time::Duration;

use shelflife::config::CacheBuilder;
use shelflife::policy::EvictionPolicyChoice;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cache = CacheBuilder::new()
        .id("demo")
        .expected_size(1_000)
        .max_idle_time(Duration::from_secs(60))
        .eviction_policy(EvictionPolicyChoice::Lfu)
        .build()
        .expect("valid configuration");

    cache.put("en".to_string(), "hello".to_string()).unwrap();
    cache.put("fr".to_string(), "bonjour".to_string()).unwrap();

    println!("en -> {:?}", cache.get(&"en".to_string()).unwrap());
    println!("de -> {:?}", cache.get(&"de".to_string()).unwrap());

    let stats = cache.statistics();
    println!(
        "hits={} misses={} puts={} size={}",
        stats.hits, stats.misses, stats.puts, stats.element_count
    );

    cache.close();
}
