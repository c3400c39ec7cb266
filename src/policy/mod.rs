//! Pluggable eviction policies.
//!
//! ## Architecture
//!
//! The eviction worker samples the live map without stopping the world, so
//! a policy cannot sort holders directly: attributes like the use count or
//! the last access time keep changing underneath the sort. Instead the
//! policy *freezes* the attribute it orders by — one `i64` snapshot per
//! entry taken at sampling time — and the comparator works on those frozen
//! entries. The sort stays well-defined even though the map is live, and
//! the per-read overhead of a running priority structure is avoided
//! entirely: policy cost is confined to eviction rounds.
//!
//! ## Key Components
//!
//! - [`EvictionPolicy`]: freeze + compare + round hooks. Entries sorted
//!   first are evicted first.
//! - [`FrozenEntry`]: key, holder reference, and frozen attribute captured
//!   during the sampling pass.
//! - [`LfuEviction`] / [`LruEviction`]: the built-in policies.
//!
//! ## Example Usage
//!
//! ```
//! use std::cmp::Ordering;
//! use shelflife::holder::EntryHolder;
//! use shelflife::policy::{EvictionPolicy, FrozenEntry};
//!
//! /// Evicts the entries with the highest use count first.
//! struct MostUsedFirst;
//!
//! impl<K, V> EvictionPolicy<K, V> for MostUsedFirst {
//!     fn freeze_value(&self, _key: &K, holder: &EntryHolder<V>) -> i64 {
//!         i64::from(holder.use_count())
//!     }
//!
//!     fn compare(&self, a: &FrozenEntry<K, V>, b: &FrozenEntry<K, V>) -> Ordering {
//!         b.frozen.cmp(&a.frozen)
//!     }
//! }
//! ```

mod lfu;
mod lru;

pub use lfu::LfuEviction;
pub use lru::LruEviction;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::holder::EntryHolder;

/// One sampled entry: the key, a holder reference, and the policy's frozen
/// ordering attribute.
pub struct FrozenEntry<K, V> {
    /// The entry's key.
    pub key: K,
    /// Reference to the live holder. May expire or be released while the
    /// round runs; the worker only counts removals that released a live
    /// holder.
    pub holder: Arc<EntryHolder<V>>,
    /// Snapshot of the attribute the policy sorts by.
    pub frozen: i64,
}

/// An eviction ordering over cache entries.
///
/// Implementations must be cheap in [`freeze_value`](Self::freeze_value):
/// it runs once per entry per round while the map stays live.
pub trait EvictionPolicy<K, V>: Send + Sync {
    /// Snapshots the mutable attribute this policy sorts by.
    fn freeze_value(&self, key: &K, holder: &EntryHolder<V>) -> i64;

    /// Orders two frozen entries; entries sorted first get evicted first.
    fn compare(&self, a: &FrozenEntry<K, V>, b: &FrozenEntry<K, V>) -> Ordering;

    /// Called before each eviction round.
    fn before_round(&self) {}

    /// Called after each eviction round.
    fn after_round(&self) {}
}

/// The built-in policy selection. `Custom` takes its implementation from
/// the builder's `eviction_custom` option; `None` makes the cache
/// unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicyChoice {
    /// Least frequently used entries are evicted first.
    #[default]
    Lfu,
    /// Least recently used entries are evicted first.
    Lru,
    /// User-provided policy.
    Custom,
    /// No eviction; the cache is unbounded.
    None,
}

// =============================================================================
// Tests
// =============================================================================
