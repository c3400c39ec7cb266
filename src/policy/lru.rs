//! Least-recently-used eviction.
//!
//! Freezes each entry's last access time; the entries idle the longest are
//! evicted first. Resolution is that of the coarse clock, so reads landing
//! on the same tick are ordered by the sampling pass.

use std::cmp::Ordering;

use crate::holder::EntryHolder;
use crate::policy::{EvictionPolicy, FrozenEntry};

/// Evicts the least recently used entries first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LruEviction;

impl<K, V> EvictionPolicy<K, V> for LruEviction {
    fn freeze_value(&self, _key: &K, holder: &EntryHolder<V>) -> i64 {
        i64::from(holder.last_access_offset())
    }

    fn compare(&self, a: &FrozenEntry<K, V>, b: &FrozenEntry<K, V>) -> Ordering {
        a.frozen.cmp(&b.frozen)
    }
}

// =============================================================================
// Tests
// =============================================================================
