//! Sharded concurrent storage map from key to entry holder.
//!
//! The store is the sole authority for membership: it owns one holder
//! reference per key and keeps a best-effort size counter next to the
//! shards. Policies and workers never learn how storage is laid out; they
//! only see holders.
//!
//! ## Architecture
//!
//! Keys are distributed over independent `RwLock`-protected shards picked
//! by hashing with the store's `BuildHasher`. Readers take a shard read
//! lock; mutators take the shard write lock, which also makes every
//! compare-and-swap operation linearizable per key. Iteration and sweeping
//! visit one shard at a time and never hold more than one lock, giving the
//! weakly consistent traversal the cache needs.
//!
//! ## Core Operations
//!
//! - `get` / `insert` / `remove`: plain keyed access.
//! - `put_if_absent` / `replace` / `compare_and_replace` / `remove_if`:
//!   CAS-style mutations decided under the shard write lock.
//! - `snapshot` / `sweep`: weakly consistent traversal for the eviction
//!   worker and the expiration sweeper.

use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::holder::EntryHolder;

type Shard<K, V> = RwLock<HashMap<K, Arc<EntryHolder<V>>>>;

/// Concurrent map of cache entries with per-shard locking.
pub(crate) struct ConcurrentStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    size: AtomicUsize,
    hasher: RandomState,
}

impl<K, V> ConcurrentStore<K, V>
where
    K: Eq + Hash,
{
    /// Creates a store sized for `expected_size` entries across
    /// `shard_count` shards.
    pub fn new(expected_size: usize, shard_count: usize) -> ConcurrentStore<K, V> {
        let shard_count = shard_count.max(1);
        let per_shard = (expected_size / shard_count).max(8);
        let shards: Vec<Shard<K, V>> = (0..shard_count)
            .map(|_| RwLock::new(HashMap::with_capacity(per_shard)))
            .collect();
        ConcurrentStore {
            shards: shards.into_boxed_slice(),
            size: AtomicUsize::new(0),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Number of shards; fixed at construction.
    #[cfg(test)]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Fetches the holder for a key, if any.
    pub fn get(&self, key: &K) -> Option<Arc<EntryHolder<V>>> {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Raw membership test. Callers that need visibility semantics must
    /// check the holder instead.
    pub fn contains(&self, key: &K) -> bool {
        self.shard_for(key).read().contains_key(key)
    }

    /// Unconditionally maps `key` to `holder`, returning the previous one.
    pub fn insert(&self, key: K, holder: Arc<EntryHolder<V>>) -> Option<Arc<EntryHolder<V>>> {
        let shard = self.shard_for(&key);
        let mut map = shard.write();
        match map.entry(key) {
            Entry::Occupied(mut entry) => Some(entry.insert(holder)),
            Entry::Vacant(entry) => {
                entry.insert(holder);
                self.size.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts only when the key is absent. Returns the resident holder
    /// when the insert lost.
    pub fn put_if_absent(
        &self,
        key: K,
        holder: Arc<EntryHolder<V>>,
    ) -> Option<Arc<EntryHolder<V>>> {
        let shard = self.shard_for(&key);
        let mut map = shard.write();
        match map.entry(key) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(holder);
                self.size.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Replaces the mapping only when the key is present. Returns the
    /// previous holder on success.
    pub fn replace(&self, key: &K, holder: Arc<EntryHolder<V>>) -> Option<Arc<EntryHolder<V>>> {
        let shard = self.shard_for(key);
        let mut map = shard.write();
        map.get_mut(key)
            .map(|slot| std::mem::replace(slot, holder))
    }

    /// Replaces the mapping only when `pred` accepts the current holder.
    ///
    /// The predicate runs under the shard write lock, so the decision and
    /// the swap are a single linearizable step for this key.
    pub fn compare_and_replace(
        &self,
        key: &K,
        pred: impl FnOnce(&Arc<EntryHolder<V>>) -> bool,
        holder: Arc<EntryHolder<V>>,
    ) -> Option<Arc<EntryHolder<V>>> {
        let shard = self.shard_for(key);
        let mut map = shard.write();
        match map.get_mut(key) {
            Some(slot) if pred(slot) => Some(std::mem::replace(slot, holder)),
            _ => None,
        }
    }

    /// Removes the mapping, returning the removed holder.
    pub fn remove(&self, key: &K) -> Option<Arc<EntryHolder<V>>> {
        let removed = self.shard_for(key).write().remove(key);
        if removed.is_some() {
            self.size.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes the mapping only when `pred` accepts the current holder.
    pub fn remove_if(
        &self,
        key: &K,
        pred: impl FnOnce(&Arc<EntryHolder<V>>) -> bool,
    ) -> Option<Arc<EntryHolder<V>>> {
        let shard = self.shard_for(key);
        let mut map = shard.write();
        match map.get(key) {
            Some(current) if pred(current) => {
                let removed = map.remove(key);
                if removed.is_some() {
                    self.size.fetch_sub(1, Ordering::Relaxed);
                }
                removed
            }
            _ => None,
        }
    }

    /// Best-effort entry count; may lag mutations in flight.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties every shard. All shard locks are held for the duration so
    /// concurrent writers observe either the old or the empty state.
    pub fn clear(&self) {
        let mut guards: Vec<_> = self.shards.iter().map(|shard| shard.write()).collect();
        for guard in guards.iter_mut() {
            guard.clear();
        }
        self.size.store(0, Ordering::Relaxed);
    }

    /// Weakly consistent snapshot of all entries, one shard at a time.
    pub fn snapshot(&self) -> Vec<(K, Arc<EntryHolder<V>>)>
    where
        K: Clone,
    {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let map = shard.read();
            out.extend(map.iter().map(|(k, h)| (k.clone(), Arc::clone(h))));
        }
        out
    }

    /// Weakly consistent snapshot of the keys.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            out.extend(shard.read().keys().cloned());
        }
        out
    }

    /// Removes every entry `f` flags, shard by shard. Returns how many
    /// entries were removed. `f` runs under the shard write lock.
    pub fn sweep(&self, mut f: impl FnMut(&K, &Arc<EntryHolder<V>>) -> bool) -> usize {
        let mut removed_total = 0;
        for shard in self.shards.iter() {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|key, holder| !f(key, holder));
            removed_total += before - map.len();
        }
        if removed_total > 0 {
            self.size.fetch_sub(removed_total, Ordering::Relaxed);
        }
        removed_total
    }
}

impl<K, V> std::fmt::Debug for ConcurrentStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentStore")
            .field("shards", &self.shards.len())
            .field("size", &self.size.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::CoarseClock;
    use std::time::Duration;

    fn holder(value: &str, clock: &CoarseClock) -> Arc<EntryHolder<String>> {
        let h = EntryHolder::new_plain(value.to_string());
        h.complete(0, 0, clock);
        Arc::new(h)
    }

    fn clock() -> Arc<CoarseClock> {
        CoarseClock::start(Duration::from_millis(2))
    }

    #[test]
    fn insert_get_remove() {
        let clock = clock();
        let store: ConcurrentStore<String, String> = ConcurrentStore::new(16, 4);
        assert!(store.insert("k1".into(), holder("v1", &clock)).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.contains(&"k1".to_string()));

        let got = store.get(&"k1".to_string()).unwrap();
        assert_eq!(got.peek(None).unwrap(), Some("v1".to_string()));

        assert!(store.remove(&"k1".to_string()).is_some());
        assert_eq!(store.len(), 0);
        assert!(store.remove(&"k1".to_string()).is_none());
    }

    #[test]
    fn insert_returns_previous_and_keeps_size() {
        let clock = clock();
        let store: ConcurrentStore<String, String> = ConcurrentStore::new(16, 4);
        store.insert("k".into(), holder("v1", &clock));
        let old = store.insert("k".into(), holder("v2", &clock)).unwrap();
        assert_eq!(old.peek(None).unwrap(), Some("v1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_if_absent_reports_resident() {
        let clock = clock();
        let store: ConcurrentStore<String, String> = ConcurrentStore::new(16, 4);
        assert!(store.put_if_absent("k".into(), holder("v1", &clock)).is_none());
        let resident = store.put_if_absent("k".into(), holder("v2", &clock)).unwrap();
        assert_eq!(resident.peek(None).unwrap(), Some("v1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_requires_presence() {
        let clock = clock();
        let store: ConcurrentStore<String, String> = ConcurrentStore::new(16, 4);
        assert!(store.replace(&"k".to_string(), holder("v", &clock)).is_none());
        store.insert("k".into(), holder("v1", &clock));
        let old = store.replace(&"k".to_string(), holder("v2", &clock)).unwrap();
        assert_eq!(old.peek(None).unwrap(), Some("v1".to_string()));
    }

    #[test]
    fn compare_and_replace_consults_predicate() {
        let clock = clock();
        let store: ConcurrentStore<String, String> = ConcurrentStore::new(16, 4);
        store.insert("k".into(), holder("v1", &clock));

        let miss = store.compare_and_replace(
            &"k".to_string(),
            |h| h.peek(None).unwrap() == Some("other".to_string()),
            holder("v2", &clock),
        );
        assert!(miss.is_none());

        let hit = store.compare_and_replace(
            &"k".to_string(),
            |h| h.peek(None).unwrap() == Some("v1".to_string()),
            holder("v2", &clock),
        );
        assert!(hit.is_some());
        let current = store.get(&"k".to_string()).unwrap();
        assert_eq!(current.peek(None).unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn remove_if_consults_predicate() {
        let clock = clock();
        let store: ConcurrentStore<String, String> = ConcurrentStore::new(16, 4);
        store.insert("k".into(), holder("v1", &clock));
        assert!(store.remove_if(&"k".to_string(), |_| false).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.remove_if(&"k".to_string(), |_| true).is_some());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn sweep_removes_flagged_entries() {
        let clock = clock();
        let store: ConcurrentStore<u32, String> = ConcurrentStore::new(64, 4);
        for i in 0..50u32 {
            store.insert(i, holder(&format!("v{i}"), &clock));
        }
        let removed = store.sweep(|key, _| key % 2 == 0);
        assert_eq!(removed, 25);
        assert_eq!(store.len(), 25);
        assert!(store.get(&1).is_some());
        assert!(store.get(&2).is_none());
    }

    #[test]
    fn snapshot_sees_all_entries() {
        let clock = clock();
        let store: ConcurrentStore<u32, String> = ConcurrentStore::new(64, 8);
        for i in 0..20u32 {
            store.insert(i, holder("v", &clock));
        }
        let snap = store.snapshot();
        assert_eq!(snap.len(), 20);
        let mut keys: Vec<u32> = snap.into_iter().map(|(k, _)| k).collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn clear_empties_everything() {
        let clock = clock();
        let store: ConcurrentStore<u32, String> = ConcurrentStore::new(64, 4);
        for i in 0..10u32 {
            store.insert(i, holder("v", &clock));
        }
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert!(store.get(&3).is_none());
    }

    #[test]
    fn shard_count_is_clamped() {
        let store: ConcurrentStore<u32, String> = ConcurrentStore::new(16, 0);
        assert_eq!(store.shard_count(), 1);
    }

    #[test]
    fn concurrent_mixed_operations_keep_size_consistent() {
        let clock = clock();
        let store: std::sync::Arc<ConcurrentStore<u64, String>> =
            std::sync::Arc::new(ConcurrentStore::new(1024, 8));

        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let store = std::sync::Arc::clone(&store);
                let clock = std::sync::Arc::clone(&clock);
                scope.spawn(move || {
                    for i in 0..250u64 {
                        let key = t * 1000 + i;
                        store.insert(key, holder("v", &clock));
                        if i % 3 == 0 {
                            store.remove(&key);
                        }
                    }
                });
            }
        });

        let snapshot_len = store.snapshot().len();
        assert_eq!(store.len(), snapshot_len);
    }
}
