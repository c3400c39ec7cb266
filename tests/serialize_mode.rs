// ==============================================
// STORE-BY-VALUE WRITE MODE (integration)
// ==============================================
//
// In Serialize mode values cross the cache boundary as encoded bytes, so
// callers cannot mutate cached state through retained references — the
// semantics are as-if by copy.

#![cfg(feature = "serde-values")]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shelflife::codec::{JsonCodec, WriteMode};
use shelflife::config::CacheBuilder;
use shelflife::policy::EvictionPolicyChoice;
use shelflife::Cache;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    visits: u32,
}

fn store_by_value() -> Cache<String, Session> {
    CacheBuilder::new()
        .eviction_policy(EvictionPolicyChoice::None)
        .write_mode(WriteMode::Serialize)
        .codec(Arc::new(JsonCodec))
        .build()
        .unwrap()
}

#[test]
fn round_trips_equal_values() {
    let cache = store_by_value();
    let session = Session {
        user: "alice".to_string(),
        visits: 3,
    };
    cache.put("s1".to_string(), session.clone()).unwrap();
    assert_eq!(cache.get(&"s1".to_string()).unwrap(), Some(session));
}

#[test]
fn mutating_a_returned_value_does_not_touch_the_cache() {
    let cache = store_by_value();
    cache
        .put(
            "s1".to_string(),
            Session {
                user: "alice".to_string(),
                visits: 1,
            },
        )
        .unwrap();

    let mut copy = cache.get(&"s1".to_string()).unwrap().unwrap();
    copy.visits = 999;
    copy.user = "mallory".to_string();

    let fresh = cache.get(&"s1".to_string()).unwrap().unwrap();
    assert_eq!(fresh.user, "alice");
    assert_eq!(fresh.visits, 1);
}

#[test]
fn conditional_operations_compare_decoded_values() {
    let cache = store_by_value();
    let v1 = Session {
        user: "alice".to_string(),
        visits: 1,
    };
    let v2 = Session {
        user: "alice".to_string(),
        visits: 2,
    };
    cache.put("s".to_string(), v1.clone()).unwrap();

    assert!(!cache
        .replace_if(&"s".to_string(), &v2, v2.clone())
        .unwrap());
    assert!(cache.replace_if(&"s".to_string(), &v1, v2.clone()).unwrap());
    assert_eq!(cache.get(&"s".to_string()).unwrap(), Some(v2.clone()));

    assert!(cache.remove_if(&"s".to_string(), &v2).unwrap());
    assert_eq!(cache.get(&"s".to_string()).unwrap(), None);
}

#[test]
fn iteration_decodes_values() {
    let cache = store_by_value();
    for i in 0..5u32 {
        cache
            .put(
                format!("s{i}"),
                Session {
                    user: format!("user{i}"),
                    visits: i,
                },
            )
            .unwrap();
    }
    let mut seen: Vec<Session> = cache.iter().unwrap().map(|(_, v)| v).collect();
    seen.sort_by_key(|s| s.visits);
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[4].user, "user4");
}
