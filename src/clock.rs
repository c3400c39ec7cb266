//! Coarse cached time source.
//!
//! Cache operations touch the clock on every read, and a syscall per read
//! dominates hot-path cost. A [`CoarseClock`] trades precision for
//! throughput: a ticker thread samples the system wall clock on a fixed
//! interval (default 10 ms) and publishes it to atomics, so readers get the
//! cached value with a plain load. All expiry comparisons in this crate are
//! defined modulo the tick precision.
//!
//! ## Key Components
//!
//! - [`CoarseClock`]: the cached clock plus its ticker worker.
//! - [`CoarseClock::global`]: the process-wide instance shared by all
//!   caches, started on first use and never stopped.
//!
//! The clock also anchors the process-wide monotonic base: entry holders
//! store times as `u32` millisecond offsets from [`CoarseClock::base_millis`]
//! to keep their layout compact.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Sender};
use tracing::debug;

/// Default ticker interval of the global clock.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A wall clock cached by a background ticker.
///
/// Readers call [`millis`](Self::millis) or [`seconds`](Self::seconds) and
/// get the most recently published sample without a syscall. Dropping the
/// last handle stops the ticker.
pub struct CoarseClock {
    base_millis: u64,
    millis: AtomicU64,
    seconds: AtomicU64,
    // Kept only so the ticker observes channel disconnection on drop.
    _stop: Sender<()>,
}

impl CoarseClock {
    /// Starts a clock with its own ticker thread.
    pub fn start(tick: Duration) -> Arc<CoarseClock> {
        let now = wall_millis();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let clock = Arc::new(CoarseClock {
            base_millis: now,
            millis: AtomicU64::new(now),
            seconds: AtomicU64::new(now / 1000),
            _stop: stop_tx,
        });

        let weak: Weak<CoarseClock> = Arc::downgrade(&clock);
        std::thread::Builder::new()
            .name(format!("shelflife-clock-{}ms", tick.as_millis()))
            .spawn(move || {
                debug!(tick_ms = tick.as_millis() as u64, "clock ticker started");
                loop {
                    match stop_rx.recv_timeout(tick) {
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    let Some(clock) = weak.upgrade() else { break };
                    let now = wall_millis();
                    clock.millis.store(now, Ordering::Relaxed);
                    clock.seconds.store(now / 1000, Ordering::Relaxed);
                }
                debug!("clock ticker stopped");
            })
            .expect("failed to spawn clock ticker");

        clock
    }

    /// The process-wide clock, started on first use with [`DEFAULT_TICK`].
    pub fn global() -> &'static Arc<CoarseClock> {
        static GLOBAL: OnceLock<Arc<CoarseClock>> = OnceLock::new();
        GLOBAL.get_or_init(|| CoarseClock::start(DEFAULT_TICK))
    }

    /// Cached wall-clock milliseconds since the Unix epoch.
    #[inline]
    pub fn millis(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }

    /// Cached wall-clock whole seconds since the Unix epoch.
    #[inline]
    pub fn seconds(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }

    /// The base timestamp all compact entry offsets are relative to.
    #[inline]
    pub fn base_millis(&self) -> u64 {
        self.base_millis
    }

    /// Current time as a compact offset from [`base_millis`](Self::base_millis).
    #[inline]
    pub fn now_offset(&self) -> u32 {
        self.millis().saturating_sub(self.base_millis) as u32
    }

    /// Converts a compact offset back into absolute milliseconds.
    #[inline]
    pub fn millis_of(&self, offset: u32) -> u64 {
        self.base_millis + u64::from(offset)
    }
}

impl std::fmt::Debug for CoarseClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoarseClock")
            .field("base_millis", &self.base_millis)
            .field("millis", &self.millis())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
