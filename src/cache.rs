//! Core cache operations.
//!
//! ## Architecture
//!
//! A [`Cache`] is a cheap clonable handle onto one shared state: the
//! sharded storage map, the configuration, the statistics recorder, the
//! listener set, the optional loader/writer seams, and up to two background
//! workers (the expiration sweeper, and the eviction worker for bounded
//! caches). Workers hold only weak references, so dropping the last handle
//! winds the cache down even without an explicit [`close`](Cache::close).
//!
//! Every mutation follows the same order: write-through first (a rejected
//! write never mutates the local map), then the map, then statistics, then
//! listener dispatch — the event for a mutation is dispatched after the
//! mutation is visible to readers.
//!
//! Reads never block and never repair the map: an expired entry found by
//! `get` is reported as a miss and left for the sweeper. Only put-family
//! operations can block, and only under the WAIT jam policy while the
//! cache is over-full.
//!
//! ## Example Usage
//!
//! ```
//! use shelflife::config::CacheBuilder;
//!
//! let cache = CacheBuilder::new().id("doc").build().unwrap();
//! cache.put("greeting".to_string(), "hello".to_string()).unwrap();
//! assert_eq!(
//!     cache.get(&"greeting".to_string()).unwrap(),
//!     Some("hello".to_string())
//! );
//! cache.close();
//! assert!(cache.get(&"greeting".to_string()).is_err());
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rustc_hash::FxHashSet;
use tracing::info;

use crate::clock::CoarseClock;
use crate::codec::{ValueCodec, WriteMode};
use crate::config::{CacheBuilder, JamPolicy};
use crate::error::CacheError;
use crate::events::{CacheEvent, EventKind, ListenerConfig, ListenerSet};
use crate::evictor::{CapacityMarks, EvictionController};
use crate::holder::EntryHolder;
use crate::integration::{CacheLoader, CacheWriter};
use crate::stats::{CacheStatistics, NoopStats, StandardStats, StatsRecorder};
use crate::store::ConcurrentStore;
use crate::sweeper::{spawn_sweeper, SweeperHandle};

/// How long `close()` waits for each background worker.
const SHUTDOWN_WAIT: Duration = Duration::from_millis(100);

/// Result of an unconditional put, shared by the put-family operations.
struct PutOutcome<V> {
    stored: bool,
    previous: Option<V>,
}

/// State shared between cache handles and background workers.
pub(crate) struct CacheShared<K, V> {
    id: String,
    clock: Arc<CoarseClock>,
    store: ConcurrentStore<K, V>,
    default_max_idle_ms: u64,
    default_max_cache_ms: u64,
    spread_secs: u32,
    cleanup_interval: Duration,
    write_mode: WriteMode,
    codec: Option<Arc<dyn ValueCodec<V>>>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
    stats: RwLock<Arc<dyn StatsRecorder>>,
    stats_enabled: AtomicBool,
    listeners: ListenerSet<K, V>,
    closed: AtomicBool,
    sweeper: Mutex<Option<SweeperHandle>>,
    evictor: Option<EvictionController<K, V>>,
}

impl<K, V> CacheShared<K, V> {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn store(&self) -> &ConcurrentStore<K, V> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &CoarseClock {
        &self.clock
    }

    pub(crate) fn evictor(&self) -> Option<&EvictionController<K, V>> {
        self.evictor.as_ref()
    }

    pub(crate) fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> Arc<dyn StatsRecorder> {
        Arc::clone(&*self.stats.read())
    }

    fn codec_ref(&self) -> Option<&dyn ValueCodec<V>> {
        self.codec.as_deref()
    }

    fn fail_if_closed(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            Err(CacheError::Closed(self.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Per-entry effective lifetime: the default plus the configured
    /// uniform random spread.
    fn effective_cache_ms(&self) -> u64 {
        if self.spread_secs == 0 {
            self.default_max_cache_ms
        } else {
            let spread = rand::thread_rng().gen_range(0..self.spread_secs);
            self.default_max_cache_ms + u64::from(spread) * 1000
        }
    }

    pub(crate) fn clear_sweeper_slot(&self) {
        *self.sweeper.lock() = None;
    }
}

impl<K, V> CacheShared<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new_completed_holder(
        &self,
        value: &V,
        idle_ms: u64,
        cache_ms: u64,
    ) -> Result<Arc<EntryHolder<V>>, CacheError> {
        let holder = match self.write_mode {
            WriteMode::Identity => EntryHolder::new_plain(value.clone()),
            WriteMode::Serialize => {
                let codec = self.codec_ref().ok_or_else(|| {
                    CacheError::Serialization("write mode Serialize but no codec configured".into())
                })?;
                let bytes = codec.encode(value).map_err(CacheError::Serialization)?;
                EntryHolder::new_serialized(bytes)
            }
        };
        holder.complete(idle_ms, cache_ms, &self.clock);
        Ok(Arc::new(holder))
    }

    fn visible_holder(&self, key: &K) -> Option<Arc<EntryHolder<V>>> {
        self.store
            .get(key)
            .filter(|holder| !holder.is_invalid(&self.clock))
    }

    pub(crate) fn notify(&self, kind: EventKind, key: K, value: Option<V>, old_value: Option<V>) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.dispatch(CacheEvent {
            kind,
            key,
            value,
            old_value,
        });
    }

    /// One sweeper pass: release and remove every invalid holder, then
    /// dispatch EXPIRED events outside the shard locks.
    pub(crate) fn sweep_pass(&self) -> usize {
        let has_listeners = !self.listeners.is_empty();
        let mut expired: Vec<(K, Option<V>)> = Vec::new();
        let removed = self.store.sweep(|key, holder| {
            if !holder.is_invalid(&self.clock) {
                return false;
            }
            let old_value = if has_listeners {
                holder.peek(self.codec_ref()).ok().flatten()
            } else {
                None
            };
            if holder.release() && has_listeners {
                expired.push((key.clone(), old_value));
            }
            true
        });
        for (key, old_value) in expired {
            self.notify(EventKind::Expired, key, None, old_value);
        }
        removed
    }

    fn writer_err(&self, source: crate::error::BoxError) -> CacheError {
        CacheError::Writer {
            cache: self.id.clone(),
            source,
        }
    }

    fn loader_err(&self, source: crate::error::BoxError) -> CacheError {
        CacheError::Loader {
            cache: self.id.clone(),
            source,
        }
    }
}

/// A concurrent key/value cache with expiration and bounded capacity.
///
/// Handles are cheap to clone and share one underlying cache. See the
/// [module docs](self) for the operation ordering guarantees and
/// [`CacheBuilder`] for construction.
pub struct Cache<K, V> {
    shared: Arc<CacheShared<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_builder(mut builder: CacheBuilder<K, V>) -> Result<Cache<K, V>, CacheError> {
        builder.validate()?;
        let id = builder.resolve_id();
        let policy = builder.resolve_policy()?;
        let clock = Arc::clone(CoarseClock::global());

        let stats: Arc<dyn StatsRecorder> = if builder.statistics {
            Arc::new(StandardStats::new(clock.millis()))
        } else {
            Arc::new(NoopStats)
        };

        let evictor = policy.map(|policy| {
            EvictionController::new(
                policy,
                CapacityMarks::compute(builder.expected_size),
                builder.jam_policy,
            )
        });

        let shared = Arc::new(CacheShared {
            listeners: ListenerSet::new(id.clone()),
            store: ConcurrentStore::new(builder.expected_size, builder.shard_count()),
            default_max_idle_ms: builder.max_idle_time.as_millis() as u64,
            default_max_cache_ms: builder.max_cache_time.as_millis() as u64,
            spread_secs: builder.max_cache_time_spread.as_secs() as u32,
            cleanup_interval: builder.resolve_cleanup_interval(),
            write_mode: builder.write_mode,
            codec: builder.codec,
            loader: builder.loader,
            writer: builder.writer,
            stats: RwLock::new(stats),
            stats_enabled: AtomicBool::new(builder.statistics),
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
            evictor,
            clock,
            id,
        });

        info!(cache = %shared.id, bounded = shared.evictor.is_some(), "cache created");
        Ok(Cache { shared })
    }

    /// The cache's id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Best-effort entry count; approximate under concurrency.
    pub fn size(&self) -> usize {
        self.shared.store.len()
    }

    /// Weakly consistent snapshot of the keys.
    pub fn keys(&self) -> Vec<K> {
        self.shared.store.keys()
    }

    // -- reads ------------------------------------------------------------

    /// Gets the value for `key`.
    ///
    /// A complete, non-expired entry counts as a hit and refreshes its
    /// access time. Otherwise the configured loader is consulted; a loaded
    /// value is stored and returned with a single miss recorded. Without a
    /// loader the miss is recorded and `None` returned. Expired entries
    /// are left for the sweeper.
    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        let stats = shared.stats();

        if let Some(holder) = shared.store.get(key) {
            if !holder.is_invalid(&shared.clock) {
                holder.increment_use_count();
                stats.record_hit();
                return holder.get(shared.codec_ref(), &shared.clock);
            }
        }

        if let Some(loader) = &shared.loader {
            return match loader.load(key) {
                Ok(Some(value)) => {
                    self.put_loaded(key.clone(), &value)?;
                    stats.record_miss();
                    Ok(Some(value))
                }
                Ok(None) => {
                    stats.record_miss();
                    Ok(None)
                }
                Err(source) => Err(shared.loader_err(source)),
            };
        }

        stats.record_miss();
        Ok(None)
    }

    /// Gets every present value for `keys`. Read-through applies per key.
    pub fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>, CacheError> {
        self.shared.fail_if_closed()?;
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    /// Whether a complete, non-expired entry exists. Never triggers the
    /// loader and does not touch access time or statistics.
    pub fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
        self.shared.fail_if_closed()?;
        Ok(self.shared.visible_holder(key).is_some())
    }

    // -- puts -------------------------------------------------------------

    /// Stores `value` under `key` with the configured expiry, replacing
    /// any previous mapping.
    ///
    /// Returns whether the value was stored; `Ok(false)` means the DROP
    /// jam policy rejected the write because the cache is over-full.
    pub fn put(&self, key: K, value: V) -> Result<bool, CacheError> {
        let cache_ms = self.shared.effective_cache_ms();
        self.put_full(key, value, self.shared.default_max_idle_ms, cache_ms, true)
            .map(|outcome| outcome.stored)
    }

    /// [`put`](Self::put) with per-entry expiry bounds (zero = no bound on
    /// that axis).
    pub fn put_with_expiry(
        &self,
        key: K,
        value: V,
        max_idle: Duration,
        max_cache_time: Duration,
    ) -> Result<bool, CacheError> {
        self.put_full(
            key,
            value,
            max_idle.as_millis() as u64,
            max_cache_time.as_millis() as u64,
            true,
        )
        .map(|outcome| outcome.stored)
    }

    /// Stores `value` and returns the previous value, if any.
    pub fn get_and_put(&self, key: K, value: V) -> Result<Option<V>, CacheError> {
        let cache_ms = self.shared.effective_cache_ms();
        self.put_full(key, value, self.shared.default_max_idle_ms, cache_ms, true)
            .map(|outcome| outcome.previous)
    }

    /// Stores every entry. The writer sees the whole batch first; entries
    /// it rejects are skipped locally and one wrapped
    /// [`CacheError::Writer`] surfaces after the remainder was processed.
    pub fn put_all(&self, entries: Vec<(K, V)>) -> Result<(), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut rejected: FxHashSet<K> = FxHashSet::default();
        let mut failure = None;
        if let Some(writer) = &shared.writer {
            if let Err(batch) = writer.write_all(&entries) {
                rejected = batch.failed_keys.into_iter().collect();
                failure = Some(batch.source);
            }
        }

        for (key, value) in entries {
            if rejected.contains(&key) {
                continue;
            }
            let cache_ms = shared.effective_cache_ms();
            self.put_full(key, value, shared.default_max_idle_ms, cache_ms, false)?;
        }

        match failure {
            Some(source) => Err(shared.writer_err(source)),
            None => Ok(()),
        }
    }

    /// Atomically inserts when `key` is absent.
    ///
    /// Counted as a read as well: an insert records a put and a miss and
    /// dispatches CREATED; losing to a resident entry records a hit,
    /// bumps that entry's use count, and returns its value.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>, CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        let stats = shared.stats();

        if let Some(writer) = &shared.writer {
            // Only write through when the insert is going to be attempted
            // against an absent mapping.
            if shared.visible_holder(&key).is_none() {
                writer
                    .write(&key, &value)
                    .map_err(|source| shared.writer_err(source))?;
            }
        }

        if !self.ensure_free_capacity()? {
            stats.record_drop();
            return Ok(None);
        }

        let cache_ms = shared.effective_cache_ms();
        let holder = shared.new_completed_holder(&value, shared.default_max_idle_ms, cache_ms)?;
        match shared.store.put_if_absent(key.clone(), holder) {
            None => {
                stats.record_put();
                stats.record_miss();
                self.ensure_sweeper();
                self.after_insert_trigger();
                shared.notify(EventKind::Created, key, Some(value), None);
                Ok(None)
            }
            Some(existing) => {
                stats.record_hit();
                existing.increment_use_count();
                existing.get(shared.codec_ref(), &shared.clock)
            }
        }
    }

    // -- replaces ---------------------------------------------------------

    /// Replaces the mapping for `key` only if one exists. Returns whether
    /// a replacement happened.
    pub fn replace(&self, key: &K, value: V) -> Result<bool, CacheError> {
        self.replace_inner(key, value).map(|(replaced, _)| replaced)
    }

    /// Replaces the mapping for `key` only if one exists and returns the
    /// previous value.
    pub fn get_and_replace(&self, key: &K, value: V) -> Result<Option<V>, CacheError> {
        self.replace_inner(key, value).map(|(_, previous)| previous)
    }

    fn replace_inner(&self, key: &K, value: V) -> Result<(bool, Option<V>), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        if !shared.store.contains(key) {
            return Ok((false, None));
        }
        if let Some(writer) = &shared.writer {
            writer
                .write(key, &value)
                .map_err(|source| shared.writer_err(source))?;
        }

        let cache_ms = shared.effective_cache_ms();
        let holder = shared.new_completed_holder(&value, shared.default_max_idle_ms, cache_ms)?;
        match shared.store.replace(key, holder) {
            Some(old) => {
                shared.stats().record_put();
                self.ensure_sweeper();
                let previous = old.peek(shared.codec_ref()).ok().flatten();
                shared.notify(
                    EventKind::Updated,
                    key.clone(),
                    Some(value),
                    previous.clone(),
                );
                Ok((true, previous))
            }
            // The mapping vanished between the check and the swap.
            None => Ok((false, None)),
        }
    }

    /// Compare-and-swap replace: succeeds only while the current value
    /// equals `expected`.
    pub fn replace_if(&self, key: &K, expected: &V, value: V) -> Result<bool, CacheError>
    where
        V: PartialEq,
    {
        let shared = &self.shared;
        shared.fail_if_closed()?;

        let Some(current) = shared.visible_holder(key) else {
            return Ok(false);
        };
        match current.peek(shared.codec_ref())? {
            Some(present) if present == *expected => {}
            _ => return Ok(false),
        }

        if let Some(writer) = &shared.writer {
            writer
                .write(key, &value)
                .map_err(|source| shared.writer_err(source))?;
        }

        let cache_ms = shared.effective_cache_ms();
        let holder = shared.new_completed_holder(&value, shared.default_max_idle_ms, cache_ms)?;
        let codec = shared.codec_ref();
        let swapped = shared
            .store
            .compare_and_replace(
                key,
                |resident| matches!(resident.peek(codec), Ok(Some(v)) if v == *expected),
                holder,
            )
            .is_some();

        if swapped {
            shared.stats().record_put();
            self.ensure_sweeper();
            shared.notify(
                EventKind::Updated,
                key.clone(),
                Some(value),
                Some(expected.clone()),
            );
        }
        Ok(swapped)
    }

    // -- removes ----------------------------------------------------------

    /// Removes the mapping for `key`. Returns whether a live entry was
    /// removed.
    pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
        self.remove_inner(key, true).map(|(released, _)| released)
    }

    /// Removes the mapping and returns its value. Also records a hit or a
    /// miss, because callers use it as a read.
    pub fn get_and_remove(&self, key: &K) -> Result<Option<V>, CacheError> {
        let stats = self.shared.stats();
        let (released, previous) = self.remove_inner(key, true)?;
        if released {
            stats.record_hit();
        } else {
            stats.record_miss();
        }
        Ok(previous)
    }

    /// Removes the mapping only while the current value equals `expected`.
    pub fn remove_if(&self, key: &K, expected: &V) -> Result<bool, CacheError>
    where
        V: PartialEq,
    {
        let shared = &self.shared;
        shared.fail_if_closed()?;

        let Some(current) = shared.visible_holder(key) else {
            return Ok(false);
        };
        match current.peek(shared.codec_ref())? {
            Some(present) if present == *expected => {}
            _ => return Ok(false),
        }

        if let Some(writer) = &shared.writer {
            writer
                .delete(key)
                .map_err(|source| shared.writer_err(source))?;
        }

        let removed = shared
            .store
            .remove_if(key, |resident| Arc::ptr_eq(resident, &current))
            .is_some();
        if removed && current.release() {
            shared.stats().record_remove();
            shared.notify(EventKind::Removed, key.clone(), None, Some(expected.clone()));
            return Ok(true);
        }
        Ok(false)
    }

    fn remove_inner(&self, key: &K, call_writer: bool) -> Result<(bool, Option<V>), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        if call_writer {
            if let Some(writer) = &shared.writer {
                writer
                    .delete(key)
                    .map_err(|source| shared.writer_err(source))?;
            }
        }

        let Some(holder) = shared.store.remove(key) else {
            return Ok((false, None));
        };
        let previous = holder.peek(shared.codec_ref()).ok().flatten();
        let released = holder.release();
        if released {
            shared.stats().record_remove();
            shared.notify(EventKind::Removed, key.clone(), None, previous.clone());
        }
        Ok((released, previous))
    }

    /// Write-through-only remove used by entry processors: the writer is
    /// invoked, the local mapping stays untouched.
    pub(crate) fn delete_write_through_only(&self, key: &K) -> Result<(), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        if let Some(writer) = &shared.writer {
            writer
                .delete(key)
                .map_err(|source| shared.writer_err(source))?;
        }
        Ok(())
    }

    /// Removes every key. The writer sees the whole batch first; keys it
    /// rejects stay present locally and one wrapped [`CacheError::Writer`]
    /// surfaces after the remainder was processed.
    pub fn remove_all(&self, keys: &[K]) -> Result<(), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut rejected: FxHashSet<K> = FxHashSet::default();
        let mut failure = None;
        if let Some(writer) = &shared.writer {
            if let Err(batch) = writer.delete_all(keys) {
                rejected = batch.failed_keys.into_iter().collect();
                failure = Some(batch.source);
            }
        }

        for key in keys {
            if rejected.contains(key) {
                continue;
            }
            self.remove_inner(key, false)?;
        }

        match failure {
            Some(source) => Err(shared.writer_err(source)),
            None => Ok(()),
        }
    }

    /// Removes every entry through the full remove path (writer, stats,
    /// listeners). Use [`clear`](Self::clear) for the silent variant.
    pub fn remove_all_entries(&self) -> Result<(), CacheError> {
        let keys = self.shared.store.keys();
        self.remove_all(&keys)
    }

    /// Empties the map without firing listeners and without recording
    /// per-entry removals. The sweeper is stopped and restarts on the
    /// next mutating operation.
    pub fn clear(&self) -> Result<(), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        if let Some(handle) = shared.sweeper.lock().take() {
            handle.stop_async();
        }
        shared.store.clear();
        Ok(())
    }

    // -- expiry -----------------------------------------------------------

    /// Schedules the entry for expiration at a random point within
    /// `max_delay`, never extending its lifetime. Useful to spread mass
    /// expiration, and with it re-fetch load, over time.
    pub fn expire_until(&self, key: &K, max_delay: Duration) -> Result<(), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        if let Some(holder) = shared.store.get(key) {
            holder.set_expire_until(max_delay, &mut rand::thread_rng());
            // The deadline may now sit before the next interval sweep.
            if let Some(sweeper) = shared.sweeper.lock().as_ref() {
                sweeper.wake();
            }
        }
        Ok(())
    }

    // -- read-through -----------------------------------------------------

    /// Bulk read-through. With `replace_existing == false` only absent
    /// keys are loaded. Loaded entries are stored with put accounting and
    /// CREATED/UPDATED events, but without write-through.
    pub fn load_all(&self, keys: &[K], replace_existing: bool) -> Result<(), CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        let loader = shared
            .loader
            .clone()
            .ok_or_else(|| shared.loader_err("no loader configured".into()))?;

        let targets: Vec<K> = if replace_existing {
            keys.to_vec()
        } else {
            keys.iter()
                .filter(|key| shared.visible_holder(key).is_none())
                .cloned()
                .collect()
        };
        if targets.is_empty() {
            return Ok(());
        }

        let loaded = loader
            .load_all(&targets)
            .map_err(|source| shared.loader_err(source))?;
        for (key, value) in loaded {
            let cache_ms = shared.effective_cache_ms();
            self.put_full(key, value, shared.default_max_idle_ms, cache_ms, false)?;
        }
        Ok(())
    }

    // -- iteration --------------------------------------------------------

    /// Weakly consistent snapshot iterator over the visible entries.
    ///
    /// [`CacheIter::remove`] performs a full cache remove of the entry
    /// yielded last, including write-through, statistics, and listeners.
    pub fn iter(&self) -> Result<CacheIter<K, V>, CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;
        let mut entries = Vec::new();
        for (key, holder) in shared.store.snapshot() {
            if holder.is_invalid(&shared.clock) {
                continue;
            }
            if let Some(value) = holder.peek(shared.codec_ref())? {
                entries.push((key, value));
            }
        }
        Ok(CacheIter {
            cache: self.clone(),
            entries: entries.into_iter(),
            current: None,
        })
    }

    // -- listeners --------------------------------------------------------

    /// Registers an entry listener. Duplicate registration names are
    /// rejected.
    pub fn register_listener(&self, config: ListenerConfig<K, V>) -> Result<(), CacheError> {
        self.shared.fail_if_closed()?;
        self.shared.listeners.register(config)
    }

    /// Removes a listener registration by name.
    pub fn deregister_listener(&self, name: &str) -> Result<bool, CacheError> {
        self.shared.fail_if_closed()?;
        Ok(self.shared.listeners.deregister(name))
    }

    // -- statistics -------------------------------------------------------

    /// Snapshot of the statistics counters.
    pub fn statistics(&self) -> CacheStatistics {
        let shared = &self.shared;
        let mut out = CacheStatistics {
            id: shared.id.clone(),
            element_count: shared.store.len(),
            ..CacheStatistics::default()
        };
        shared
            .stats()
            .fill(shared.clock.millis(), shared.clock.seconds(), &mut out);
        out
    }

    /// Enables or disables statistics. Disabling installs a no-op
    /// recorder and discards prior values; re-enabling starts from zero.
    pub fn enable_statistics(&self, enable: bool) {
        let shared = &self.shared;
        let currently = shared.stats_enabled.load(Ordering::Acquire);
        if enable == currently {
            return;
        }
        let recorder: Arc<dyn StatsRecorder> = if enable {
            Arc::new(StandardStats::new(shared.clock.millis()))
        } else {
            Arc::new(NoopStats)
        };
        *shared.stats.write() = recorder;
        shared.stats_enabled.store(enable, Ordering::Release);
    }

    // -- lifecycle --------------------------------------------------------

    /// Closes the cache: signals both workers, waits briefly for each,
    /// and makes every further operation fail fast. Idempotent; shutdown
    /// problems are logged, never surfaced.
    pub fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(cache = %shared.id, "closing cache");
        if let Some(evictor) = &shared.evictor {
            evictor.shutdown(SHUTDOWN_WAIT);
        }
        let sweeper = shared.sweeper.lock().take();
        if let Some(handle) = sweeper {
            handle.stop(SHUTDOWN_WAIT);
        }
        shared.listeners.shutdown();
        info!(cache = %shared.id, "cache closed");
    }

    // -- internals --------------------------------------------------------

    fn put_full(
        &self,
        key: K,
        value: V,
        idle_ms: u64,
        cache_ms: u64,
        call_writer: bool,
    ) -> Result<PutOutcome<V>, CacheError> {
        let shared = &self.shared;
        shared.fail_if_closed()?;

        if call_writer {
            if let Some(writer) = &shared.writer {
                writer
                    .write(&key, &value)
                    .map_err(|source| shared.writer_err(source))?;
            }
        }

        if !self.ensure_free_capacity()? {
            shared.stats().record_drop();
            return Ok(PutOutcome {
                stored: false,
                previous: None,
            });
        }

        let holder = shared.new_completed_holder(&value, idle_ms, cache_ms)?;
        let old_holder = shared.store.insert(key.clone(), holder);
        shared.stats().record_put();
        self.ensure_sweeper();
        self.after_insert_trigger();

        let was_present = old_holder.is_some();
        let previous = old_holder.and_then(|h| h.peek(shared.codec_ref()).ok().flatten());
        let kind = if was_present {
            EventKind::Updated
        } else {
            EventKind::Created
        };
        shared.notify(kind, key, Some(value), previous.clone());

        Ok(PutOutcome {
            stored: true,
            previous,
        })
    }

    /// Insert path of the read-through loader: put accounting, no events,
    /// no write-through.
    fn put_loaded(&self, key: K, value: &V) -> Result<(), CacheError> {
        let shared = &self.shared;
        if !self.ensure_free_capacity()? {
            shared.stats().record_drop();
            return Ok(());
        }
        let cache_ms = shared.effective_cache_ms();
        let holder = shared.new_completed_holder(value, shared.default_max_idle_ms, cache_ms)?;
        shared.store.insert(key, holder);
        shared.stats().record_put();
        self.ensure_sweeper();
        self.after_insert_trigger();
        Ok(())
    }

    /// Applies the jam policy before a write. `Ok(false)` means DROP
    /// rejected the write; under WAIT this blocks until the eviction
    /// worker has brought the size below the block mark.
    fn ensure_free_capacity(&self) -> Result<bool, CacheError> {
        let shared = &self.shared;
        let Some(evictor) = &shared.evictor else {
            return Ok(true);
        };
        if shared.store.len() < evictor.marks.user_data_elements {
            return Ok(true);
        }

        evictor.ensure_worker(shared);
        evictor.trigger();

        if shared.store.len() < evictor.marks.block_start_at {
            return Ok(true);
        }
        shared.stats().record_eviction_halt();

        if evictor.jam == JamPolicy::Drop {
            // Even when dropping, keep the worker making room for the
            // next write.
            evictor.trigger();
            return Ok(false);
        }

        while shared.store.len() >= evictor.marks.block_start_at {
            shared.fail_if_closed()?;
            evictor.wait_done(Duration::from_millis(50));
            evictor.ensure_worker(shared);
            evictor.trigger();
        }
        Ok(true)
    }

    /// Signals the eviction worker after an insert pushed the size over
    /// capacity, so pending-signal drain implies the capacity invariant.
    fn after_insert_trigger(&self) {
        let shared = &self.shared;
        if let Some(evictor) = &shared.evictor {
            if shared.store.len() > evictor.marks.user_data_elements {
                evictor.ensure_worker(shared);
                evictor.trigger();
            }
        }
    }

    /// Restarts the expiration sweeper if it is not running.
    fn ensure_sweeper(&self) {
        let shared = &self.shared;
        let mut slot = shared.sweeper.lock();
        if slot.is_none() {
            *slot = Some(spawn_sweeper(shared));
        }
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: Eq + std::hash::Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("id", &self.shared.id)
            .field("size", &self.shared.store.len())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Snapshot iterator over a cache's visible entries.
pub struct CacheIter<K, V> {
    cache: Cache<K, V>,
    entries: std::vec::IntoIter<(K, V)>,
    current: Option<K>,
}

impl<K, V> Iterator for CacheIter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.entries.next()?;
        self.current = Some(key.clone());
        Some((key, value))
    }
}

impl<K, V> CacheIter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Removes the entry yielded last through the full cache remove path
    /// (write-through, statistics, listeners).
    pub fn remove(&mut self) -> Result<bool, CacheError> {
        match self.current.take() {
            Some(key) => self.cache.remove(&key),
            None => Ok(false),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
