//! Background expiration sweeper.
//!
//! One worker per cache. It sleeps for the configured cleanup interval,
//! then walks the map weakly consistently, releasing and removing every
//! holder whose validity check fails, and fires EXPIRED events for the
//! entries it reclaimed.
//!
//! Idle caches stay cheap: when a sweep leaves the map empty, the worker
//! clears its own slot and exits; the next mutating operation restarts it.
//! The same rule covers failures — a worker that dies is replaced on the
//! next put instead of being nursed back.
//!
//! Control messages arrive on a small channel whose `recv_timeout` doubles
//! as the interval sleep. More than ten wakeups in a row without a full
//! interval completing in between indicate a wakeup storm; the worker logs
//! an error and halts rather than spin.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::cache::CacheShared;

/// Consecutive control-channel wakeups tolerated between interval sleeps.
const MAX_WAKEUPS_WITHOUT_SWEEP: u32 = 10;

/// Control messages for the sweeper worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepControl {
    /// Re-evaluate immediately instead of waiting out the interval.
    Wake,
    /// Exit the worker loop.
    Stop,
}

/// Handle to a running sweeper: its control channel and join handle.
pub(crate) struct SweeperHandle {
    tx: Sender<SweepControl>,
    worker: JoinHandle<()>,
}

impl SweeperHandle {
    /// Nudges the worker to sweep now instead of waiting out the
    /// interval, e.g. after an entry's deadline was shortened.
    pub fn wake(&self) {
        let _ = self.tx.try_send(SweepControl::Wake);
    }

    /// Asks the worker to exit and waits up to `budget` for it. A worker
    /// that does not stop in time is detached and logged.
    pub fn stop(self, budget: Duration) {
        let _ = self.tx.try_send(SweepControl::Stop);
        let deadline = std::time::Instant::now() + budget;
        while !self.worker.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        if self.worker.is_finished() {
            let _ = self.worker.join();
        } else {
            warn!("expiration sweeper did not stop in time, detaching");
        }
    }

    /// Fire-and-forget stop, used by `clear()` where nobody waits.
    pub fn stop_async(self) {
        let _ = self.tx.try_send(SweepControl::Stop);
    }
}

/// Spawns the sweeper for `shared`. Callers hold the sweeper slot lock.
pub(crate) fn spawn_sweeper<K, V>(shared: &Arc<CacheShared<K, V>>) -> SweeperHandle
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let weak: Weak<CacheShared<K, V>> = Arc::downgrade(shared);
    let interval = shared.cleanup_interval();
    let id = shared.id().to_string();
    let (tx, rx) = bounded(4);

    let worker = std::thread::Builder::new()
        .name(format!("shelflife-sweep-{id}"))
        .spawn(move || {
            info!(cache = %id, interval_ms = interval.as_millis() as u64, "expiration sweeper started");
            let mut wakeups_without_sweep: u32 = 0;
            loop {
                match rx.recv_timeout(interval) {
                    // A full interval went by; the storm counter starts over.
                    Err(RecvTimeoutError::Timeout) => wakeups_without_sweep = 0,
                    Ok(SweepControl::Wake) => {
                        wakeups_without_sweep += 1;
                        if wakeups_without_sweep > MAX_WAKEUPS_WITHOUT_SWEEP {
                            error!(cache = %id, "wakeup storm detected, halting sweeper");
                            if let Some(shared) = weak.upgrade() {
                                shared.clear_sweeper_slot();
                            }
                            break;
                        }
                    }
                    Ok(SweepControl::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let Some(shared) = weak.upgrade() else { break };
                if shared.is_closed() {
                    break;
                }

                let removed = shared.sweep_pass();
                if removed > 0 {
                    info!(cache = %id, removed, "expired entries removed");
                }

                if shared.store().is_empty() {
                    // Nothing left to expire; restart happens on the next
                    // mutating operation.
                    debug!(cache = %id, "map empty, sweeper stopping itself");
                    shared.clear_sweeper_slot();
                    break;
                }
            }
            info!(cache = %id, "expiration sweeper stopped");
        })
        .expect("failed to spawn expiration sweeper");

    SweeperHandle { tx, worker }
}
