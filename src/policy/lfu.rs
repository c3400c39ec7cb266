//! Least-frequently-used eviction.
//!
//! Freezes each entry's use count; entries with the smallest count are
//! evicted first. Ties go to the entry with the older last access time, so
//! a batch of never-read entries is reclaimed oldest-first instead of in
//! map order.

use std::cmp::Ordering;

use crate::holder::EntryHolder;
use crate::policy::{EvictionPolicy, FrozenEntry};

/// Evicts the least frequently used entries first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LfuEviction;

impl<K, V> EvictionPolicy<K, V> for LfuEviction {
    fn freeze_value(&self, _key: &K, holder: &EntryHolder<V>) -> i64 {
        i64::from(holder.use_count())
    }

    fn compare(&self, a: &FrozenEntry<K, V>, b: &FrozenEntry<K, V>) -> Ordering {
        a.frozen
            .cmp(&b.frozen)
            .then_with(|| a.holder.last_access_offset().cmp(&b.holder.last_access_offset()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::CoarseClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn entry(key: u32, reads: u32, clock: &CoarseClock) -> FrozenEntry<u32, String> {
        let holder = EntryHolder::new_plain("v".to_string());
        holder.complete(0, 0, clock);
        for _ in 0..reads {
            holder.increment_use_count();
        }
        FrozenEntry {
            frozen: EvictionPolicy::<u32, String>::freeze_value(&LfuEviction, &key, &holder),
            key,
            holder: Arc::new(holder),
        }
    }

    #[test]
    fn least_used_sorts_first() {
        let clock = CoarseClock::start(Duration::from_millis(2));
        let policy = LfuEviction;
        let cold = entry(1, 0, &clock);
        let hot = entry(2, 9, &clock);
        assert_eq!(policy.compare(&cold, &hot), Ordering::Less);
        assert_eq!(policy.compare(&hot, &cold), Ordering::Greater);
    }

    #[test]
    fn ties_break_on_older_access_time() {
        let clock = CoarseClock::start(Duration::from_millis(2));
        let policy = LfuEviction;
        let older = entry(1, 3, &clock);
        std::thread::sleep(Duration::from_millis(25));
        let newer = entry(2, 3, &clock);
        assert_eq!(policy.compare(&older, &newer), Ordering::Less);
    }

    #[test]
    fn sort_produces_eviction_order() {
        let clock = CoarseClock::start(Duration::from_millis(2));
        let policy = LfuEviction;
        let mut entries = vec![entry(1, 5, &clock), entry(2, 0, &clock), entry(3, 2, &clock)];
        entries.sort_by(|a, b| policy.compare(a, b));
        let keys: Vec<u32> = entries.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![2, 3, 1]);
    }
}
