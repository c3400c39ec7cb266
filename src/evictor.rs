//! Background eviction worker for bounded caches.
//!
//! ## Architecture
//!
//! Foreground writers never evict. When a put finds the cache full it
//! drops a signal into a bounded channel (capacity 2, non-blocking offer;
//! duplicate signals collapse into the one already queued) and moves on.
//! The worker drains pending signals *before* flipping its `running` flag,
//! so a request arriving strictly after the flip is guaranteed a
//! subsequent pass.
//!
//! One round: compute how many entries to remove, snapshot the live map
//! into `(key, holder, frozen_value)` triples, sort with the policy
//! comparator, then walk the sorted array removing entries. Only removals
//! that released a live holder count — concurrently expired or removed
//! entries do not. The sort runs on frozen snapshots and therefore never
//! blocks foreground mutations; the O(n log n) cost is amortized over the
//! `evict_normally` slots one round reclaims.
//!
//! ## Capacity marks
//!
//! - `user_data_elements`: the configured capacity.
//! - `block_start_at`: the over-full threshold where WAIT-policy writers
//!   block (15% headroom, at least one slot).
//! - `evict_normally`: the target batch size of a round (10%).
//! - `evict_until_at_least`: the lower target after a round.
//!
//! Writers blocked under the WAIT jam policy park on the `eviction_done`
//! condition and are woken after every round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::cache::CacheShared;
use crate::config::JamPolicy;
use crate::policy::{EvictionPolicy, FrozenEntry};

/// Signals accepted by the eviction worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictSignal {
    Evict,
    Shutdown,
}

// =============================================================================
// Capacity marks
// =============================================================================

/// The fill marks of a bounded cache, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CapacityMarks {
    pub user_data_elements: usize,
    pub block_start_at: usize,
    pub evict_normally: usize,
    pub evict_until_at_least: usize,
}

impl CapacityMarks {
    pub fn compute(expected_size: usize) -> CapacityMarks {
        let user = expected_size;
        // At least one slot of headroom, or a WAIT writer on a tiny cache
        // could never unblock.
        let headroom = ((user as f64 * 0.15).ceil() as usize).max(1);
        let evict_normally = user / 10;
        CapacityMarks {
            user_data_elements: user,
            block_start_at: user + headroom,
            evict_normally,
            evict_until_at_least: user - evict_normally,
        }
    }

    /// How many entries a round should remove, given the current size.
    ///
    /// Zero below capacity. Otherwise the normal batch, enlarged when even
    /// a full batch would leave the size above the lower target (the size
    /// can overshoot when `len` lags or when signals arrive faster than
    /// rounds run).
    pub fn elements_to_remove(&self, current: usize) -> usize {
        if current < self.user_data_elements {
            return 0;
        }
        let target = current.saturating_sub(self.evict_normally);
        if target <= self.evict_until_at_least {
            self.evict_normally
        } else {
            current - self.evict_until_at_least
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Owns the signal channel, the `eviction_done` condition, and the worker
/// thread of one bounded cache.
pub(crate) struct EvictionController<K, V> {
    pub policy: Arc<dyn EvictionPolicy<K, V>>,
    pub marks: CapacityMarks,
    pub jam: JamPolicy,
    signal_tx: Sender<EvictSignal>,
    signal_rx: Receiver<EvictSignal>,
    running: AtomicBool,
    done_lock: Mutex<()>,
    done_cv: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> EvictionController<K, V>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        policy: Arc<dyn EvictionPolicy<K, V>>,
        marks: CapacityMarks,
        jam: JamPolicy,
    ) -> EvictionController<K, V> {
        // One queued signal would be enough; two decouple reads and writes.
        let (signal_tx, signal_rx) = bounded(2);
        EvictionController {
            policy,
            marks,
            jam,
            signal_tx,
            signal_rx,
            running: AtomicBool::new(false),
            done_lock: Mutex::new(()),
            done_cv: Condvar::new(),
            worker: Mutex::new(None),
        }
    }

    /// Requests an eviction pass. Non-blocking; a full queue means a
    /// request is already pending and this one collapses into it. The
    /// worker drains pending signals before flipping `running`, so an
    /// offer landing during a round still earns its own pass.
    pub fn trigger(&self) {
        let _ = self.signal_tx.try_send(EvictSignal::Evict);
    }

    /// Spawns the worker if it is not running (first use, or after it died
    /// on an unexpected failure).
    pub fn ensure_worker(&self, shared: &Arc<CacheShared<K, V>>) {
        let mut slot = self.worker.lock();
        let alive = slot.as_ref().is_some_and(|handle| !handle.is_finished());
        if alive {
            return;
        }
        let weak = Arc::downgrade(shared);
        let rx = self.signal_rx.clone();
        let id = shared.id().to_string();
        let handle = std::thread::Builder::new()
            .name(format!("shelflife-evict-{id}"))
            .spawn(move || worker_loop(weak, rx, id))
            .expect("failed to spawn eviction worker");
        *slot = Some(handle);
        debug!("eviction worker spawned");
    }

    /// Parks the caller until the current round finishes or the timeout
    /// elapses. Returns immediately when no round is running.
    pub fn wait_done(&self, timeout: Duration) {
        let mut guard = self.done_lock.lock();
        if self.running.load(Ordering::Acquire) {
            self.done_cv.wait_for(&mut guard, timeout);
        }
    }

    /// Wakes every writer parked on the `eviction_done` condition.
    pub fn notify_waiters(&self) {
        let _guard = self.done_lock.lock();
        self.done_cv.notify_all();
    }

    fn finish_round(&self) {
        self.running.store(false, Ordering::Release);
        self.notify_waiters();
    }

    /// Stops the worker, waiting up to `budget` for it to exit. A worker
    /// that does not stop in time is detached and logged, never joined
    /// indefinitely.
    pub fn shutdown(&self, budget: Duration) {
        let _ = self.signal_tx.try_send(EvictSignal::Shutdown);
        self.notify_waiters();

        let handle = self.worker.lock().take();
        let Some(handle) = handle else { return };
        let deadline = std::time::Instant::now() + budget;
        while !handle.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("eviction worker did not stop in time, detaching");
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

fn worker_loop<K, V>(weak: Weak<CacheShared<K, V>>, rx: Receiver<EvictSignal>, id: String)
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    info!(cache = %id, "eviction worker started");
    'outer: loop {
        match rx.recv() {
            Ok(EvictSignal::Evict) => {}
            Ok(EvictSignal::Shutdown) | Err(_) => break,
        }

        let Some(shared) = weak.upgrade() else { break };
        let Some(controller) = shared.evictor() else { break };

        // Drain duplicate signals before flipping `running`, so a request
        // arriving after the flip gets its own pass.
        let mut stop = false;
        while let Ok(signal) = rx.try_recv() {
            if signal == EvictSignal::Shutdown {
                stop = true;
            }
        }
        if stop || shared.is_closed() {
            controller.finish_round();
            break 'outer;
        }

        controller.running.store(true, Ordering::Release);
        run_round(&shared, controller);
        controller.finish_round();
    }
    info!(cache = %id, "eviction worker stopped");
}

/// One eviction round: freeze, sort, remove, account.
fn run_round<K, V>(shared: &CacheShared<K, V>, controller: &EvictionController<K, V>)
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let to_remove = controller.marks.elements_to_remove(shared.store().len());
    if to_remove == 0 {
        return;
    }

    let stats = shared.stats();
    stats.record_eviction_round();
    let policy = &controller.policy;
    policy.before_round();

    let mut frozen: Vec<FrozenEntry<K, V>> = shared
        .store()
        .snapshot()
        .into_iter()
        .map(|(key, holder)| FrozenEntry {
            frozen: policy.freeze_value(&key, &holder),
            key,
            holder,
        })
        .collect();
    frozen.sort_by(|a, b| policy.compare(a, b));

    let mut removed: u64 = 0;
    for entry in &frozen {
        if let Some(holder) = shared.store().remove(&entry.key) {
            // Count only entries we actually evicted; others vanished
            // concurrently through expiration or an explicit remove.
            if holder.release() {
                removed += 1;
                if removed >= to_remove as u64 {
                    break;
                }
            }
        }
    }

    policy.after_round();
    if removed > 0 {
        stats.record_evictions(shared.clock().seconds(), removed);
    }
    debug!(
        sampled = frozen.len(),
        target = to_remove,
        removed,
        "eviction round finished"
    );
    if removed < to_remove as u64 {
        // Everything else disappeared underneath us; the next signal will
        // re-evaluate.
        debug!("eviction round ended short of its target");
    }
}

// =============================================================================
// Tests
// =============================================================================
