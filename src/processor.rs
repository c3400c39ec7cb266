//! Atomic per-key entry processors.
//!
//! An entry processor runs user code against a mutable surrogate of one
//! entry. The surrogate starts from the current value — resolved through
//! the read-through loader when the key is absent — and records what the
//! processor asked for instead of mutating anything directly. After the
//! processor returns, the recorded operation is applied through the same
//! linearizable map operations every other caller uses, so an observer
//! never sees the pre-processor value and the processor's event in a
//! contradictory order.
//!
//! ## Key Components
//!
//! - [`MutableEntry`]: the surrogate handed to the processor.
//! - [`Cache::invoke`] / [`Cache::invoke_all`]: run a processor for one
//!   key or a batch; batch failures are collected per key and never abort
//!   the remaining keys.
//!
//! Processor failures are wrapped once as
//! [`CacheError::Processor`](crate::error::CacheError::Processor); a
//! processor that already failed with that kind is propagated unchanged.
//!
//! ## Example Usage
//!
//! ```
//! use shelflife::config::CacheBuilder;
//!
//! let cache = CacheBuilder::new().build().unwrap();
//! cache.put("counter".to_string(), 41u64).unwrap();
//!
//! let next = cache
//!     .invoke("counter".to_string(), |entry| {
//!         let next = entry.value().copied().unwrap_or(0) + 1;
//!         entry.set_value(next);
//!         Ok(next)
//!     })
//!     .unwrap();
//! assert_eq!(next, 42);
//! assert_eq!(cache.get(&"counter".to_string()).unwrap(), Some(42));
//! ```

use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::cache::Cache;
use crate::error::{BoxError, CacheError};

/// The operation a processor asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOp {
    Nop,
    Set,
    Remove,
    RemoveWriteThrough,
}

/// Mutable surrogate of one cache entry.
///
/// Changes have no direct effect; they are applied after the processor
/// has returned, and the last requested operation wins.
pub struct MutableEntry<K, V> {
    key: K,
    value: Option<V>,
    op: EntryOp,
}

impl<K, V> MutableEntry<K, V> {
    fn new(key: K, value: Option<V>) -> MutableEntry<K, V> {
        MutableEntry {
            key,
            value,
            op: EntryOp::Nop,
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether the entry exists from the processor's point of view,
    /// including a value set earlier in the same invocation.
    pub fn exists(&self) -> bool {
        self.op != EntryOp::Remove && self.value.is_some()
    }

    /// The current (possibly already mutated) value.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Requests that the entry be set to `value`.
    pub fn set_value(&mut self, value: V) {
        self.op = EntryOp::Set;
        self.value = Some(value);
    }

    /// Requests that the entry be removed.
    pub fn remove(&mut self) {
        self.op = EntryOp::Remove;
    }

    /// Requests a remove that reaches only the write-through writer and
    /// leaves the local mapping untouched.
    pub fn remove_write_through(&mut self) {
        self.op = EntryOp::RemoveWriteThrough;
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Runs `processor` against the entry for `key` and applies the
    /// operation it recorded.
    ///
    /// The current value is resolved through the read-through loader when
    /// the key is absent. The processor's effects become visible through
    /// the regular put/remove paths, events included.
    pub fn invoke<R>(
        &self,
        key: K,
        processor: impl FnOnce(&mut MutableEntry<K, V>) -> Result<R, BoxError>,
    ) -> Result<R, CacheError> {
        let current = self.get(&key)?;
        let mut entry = MutableEntry::new(key, current);

        let result = processor(&mut entry).map_err(CacheError::from_processor)?;

        let MutableEntry { key, value, op } = entry;
        match op {
            EntryOp::Nop => {}
            EntryOp::Set => {
                if let Some(value) = value {
                    self.put(key, value)?;
                }
            }
            EntryOp::Remove => {
                self.remove(&key)?;
            }
            EntryOp::RemoveWriteThrough => {
                self.delete_write_through_only(&key)?;
            }
        }
        Ok(result)
    }

    /// Runs `processor` for every key. Per-key failures land in the
    /// result map and do not abort the batch.
    pub fn invoke_all<R>(
        &self,
        keys: Vec<K>,
        processor: impl Fn(&mut MutableEntry<K, V>) -> Result<R, BoxError>,
    ) -> Result<FxHashMap<K, Result<R, CacheError>>, CacheError> {
        let mut results = FxHashMap::default();
        for key in keys {
            let outcome = self.invoke(key.clone(), &processor);
            results.insert(key, outcome);
        }
        Ok(results)
    }
}

// =============================================================================
// Tests
// =============================================================================
