//! Per-entry holder: the value plus its expiry and access metadata.
//!
//! ## Architecture
//!
//! A cache entry is an [`EntryHolder`] shared behind an `Arc`. The map owns
//! one reference, but readers and background workers may hold others past
//! the entry's removal, so the holder is built around interior mutability
//! instead of ownership transfer:
//!
//! - The value sits in a lock-guarded slot that [`release`](EntryHolder::release)
//!   empties exactly once. A released holder is invalid forever; in-flight
//!   readers observe the empty slot and treat the entry as expired.
//! - Holders are created *incomplete* and become visible only after
//!   [`complete`](EntryHolder::complete) has set the expiry fields and
//!   flipped the state flag, so a half-initialized entry can never be
//!   observed by the sweeper or by readers.
//!
//! ## Compact layout
//!
//! All times are `u32` millisecond offsets from the process-wide clock base,
//! and the two expiry bounds use a seconds-or-millis unit: durations that
//! fit in 31 bits are stored as exact milliseconds, anything longer as whole
//! seconds with the top bit set. Conversions are lossless within each
//! regime.
//!
//! ## Key Components
//!
//! - [`EntryHolder`]: value slot, input/last-access times, idle and
//!   lifetime bounds, use count, serialized/complete flags.
//! - [`EntryHolder::is_invalid`]: the single visibility rule used by reads,
//!   the sweeper, and the eviction worker.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;

use crate::clock::CoarseClock;
use crate::codec::ValueCodec;
use crate::error::CacheError;

const FLAG_SERIALIZED: u8 = 0b0000_0001;
const FLAG_COMPLETE: u8 = 0b0010_0000;

/// Unit flag of the compact duration encoding: set = seconds, clear = millis.
const UNIT_SECONDS: u32 = 1 << 31;
const UNIT_VALUE_MASK: u32 = UNIT_SECONDS - 1;

/// Encodes a millisecond duration into the compact seconds-or-millis unit.
///
/// `0` stays `0` and means "no bound on this axis".
pub(crate) fn duration_to_internal(millis: u64) -> u32 {
    if millis <= u64::from(UNIT_VALUE_MASK) {
        millis as u32
    } else {
        let secs = (millis / 1000).min(u64::from(UNIT_VALUE_MASK)) as u32;
        UNIT_SECONDS | secs
    }
}

/// Decodes the compact seconds-or-millis unit back into milliseconds.
pub(crate) fn internal_to_millis(internal: u32) -> u64 {
    if internal & UNIT_SECONDS != 0 {
        u64::from(internal & UNIT_VALUE_MASK) * 1000
    } else {
        u64::from(internal)
    }
}

/// The stored form of a value: shared as inserted, or encoded bytes.
enum StoredValue<V> {
    Plain(Arc<V>),
    Serialized(Arc<[u8]>),
}

impl<V> Clone for StoredValue<V> {
    fn clone(&self) -> Self {
        match self {
            StoredValue::Plain(v) => StoredValue::Plain(Arc::clone(v)),
            StoredValue::Serialized(b) => StoredValue::Serialized(Arc::clone(b)),
        }
    }
}

/// A cache entry with its value and expiration/access metadata.
///
/// The holder is valid as long as its value slot is populated, its state is
/// complete, and neither the lifetime nor the idle bound has been exceeded.
pub struct EntryHolder<V> {
    value: RwLock<Option<StoredValue<V>>>,
    /// Insertion time, ms offset from the clock base.
    input_time: AtomicU32,
    /// Last read time, ms offset from the clock base.
    last_access: AtomicU32,
    /// Maximum idle time in the compact unit; 0 = never expire by idleness.
    max_idle: AtomicU32,
    /// Maximum absolute lifetime in the compact unit; 0 = never expire by age.
    max_cache_time: AtomicU32,
    /// Read counter, relaxed on purpose: lost updates are acceptable, the
    /// value is only a statistical eviction input.
    use_count: AtomicU32,
    flags: AtomicU8,
}

impl<V> EntryHolder<V> {
    /// Creates an incomplete holder around a value stored as-is.
    pub(crate) fn new_plain(value: V) -> EntryHolder<V> {
        EntryHolder {
            value: RwLock::new(Some(StoredValue::Plain(Arc::new(value)))),
            input_time: AtomicU32::new(0),
            last_access: AtomicU32::new(0),
            max_idle: AtomicU32::new(0),
            max_cache_time: AtomicU32::new(0),
            use_count: AtomicU32::new(0),
            flags: AtomicU8::new(0),
        }
    }

    /// Creates an incomplete holder around an already-encoded value.
    pub(crate) fn new_serialized(bytes: Vec<u8>) -> EntryHolder<V> {
        EntryHolder {
            value: RwLock::new(Some(StoredValue::Serialized(bytes.into()))),
            input_time: AtomicU32::new(0),
            last_access: AtomicU32::new(0),
            max_idle: AtomicU32::new(0),
            max_cache_time: AtomicU32::new(0),
            use_count: AtomicU32::new(0),
            flags: AtomicU8::new(FLAG_SERIALIZED),
        }
    }

    /// Finalizes the expiry fields, records the input and access times, and
    /// flips the holder to complete. Must be called before the holder is
    /// published to readers.
    pub(crate) fn complete(&self, max_idle_ms: u64, max_cache_ms: u64, clock: &CoarseClock) {
        self.max_idle
            .store(duration_to_internal(max_idle_ms), Ordering::Relaxed);
        self.max_cache_time
            .store(duration_to_internal(max_cache_ms), Ordering::Relaxed);
        let now = clock.now_offset();
        self.input_time.store(now, Ordering::Relaxed);
        self.last_access.store(now, Ordering::Relaxed);
        self.flags.fetch_or(FLAG_COMPLETE, Ordering::Release);
    }

    /// Reads the value without touching access time or counters.
    ///
    /// Returns `None` if the holder has been released. Decodes through the
    /// codec when the value is stored in serialized form.
    pub(crate) fn peek(
        &self,
        codec: Option<&dyn ValueCodec<V>>,
    ) -> Result<Option<V>, CacheError>
    where
        V: Clone,
    {
        let stored = self.value.read().clone();
        match stored {
            None => Ok(None),
            Some(StoredValue::Plain(v)) => Ok(Some((*v).clone())),
            Some(StoredValue::Serialized(bytes)) => {
                let codec = codec.ok_or_else(|| {
                    CacheError::Serialization("serialized value but no codec configured".into())
                })?;
                codec
                    .decode(&bytes)
                    .map(Some)
                    .map_err(CacheError::Serialization)
            }
        }
    }

    /// [`peek`](Self::peek) plus an update of the last access time.
    pub(crate) fn get(
        &self,
        codec: Option<&dyn ValueCodec<V>>,
        clock: &CoarseClock,
    ) -> Result<Option<V>, CacheError>
    where
        V: Clone,
    {
        self.last_access.store(clock.now_offset(), Ordering::Relaxed);
        self.peek(codec)
    }

    /// Increments the read counter. Relaxed by design; see the field note.
    #[inline]
    pub(crate) fn increment_use_count(&self) {
        self.use_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Current read count.
    #[inline]
    pub fn use_count(&self) -> u32 {
        self.use_count.load(Ordering::Relaxed)
    }

    /// Last access time as a compact offset; monotonic within the process.
    #[inline]
    pub fn last_access_offset(&self) -> u32 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Insertion time as a compact offset.
    #[inline]
    pub fn input_offset(&self) -> u32 {
        self.input_time.load(Ordering::Relaxed)
    }

    /// Whether the value is stored in serialized form.
    #[inline]
    pub fn is_serialized(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & FLAG_SERIALIZED != 0
    }

    #[inline]
    fn is_complete(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_COMPLETE != 0
    }

    /// Whether the holder must be treated as expired.
    ///
    /// True iff the holder was released, is still incomplete, its age
    /// exceeds the lifetime bound, or its idleness exceeds the idle bound
    /// (0 meaning "no bound" on either axis).
    pub fn is_invalid(&self, clock: &CoarseClock) -> bool {
        if self.value.read().is_none() {
            return true; // released, e.g. via expiration or eviction
        }
        if !self.is_complete() {
            return true;
        }

        let now = clock.millis();

        let lifetime_ms = internal_to_millis(self.max_cache_time.load(Ordering::Relaxed));
        if lifetime_ms > 0 {
            let age = now.saturating_sub(clock.millis_of(self.input_offset()));
            if age > lifetime_ms {
                return true;
            }
        }

        let idle_ms = internal_to_millis(self.max_idle.load(Ordering::Relaxed));
        if idle_ms == 0 {
            return false;
        }
        let idle = now.saturating_sub(clock.millis_of(self.last_access_offset()));
        idle > idle_ms
    }

    /// Empties the value slot so the data can be reclaimed even while other
    /// threads still reference the holder.
    ///
    /// Returns `true` only for the call that actually performed the
    /// release; concurrent deletes, expiration, and eviction may race here
    /// and exactly one of them wins.
    pub(crate) fn release(&self) -> bool {
        self.value.write().take().is_some()
    }

    /// Schedules a randomized earlier expiration within `max_delay` of the
    /// entry's insertion. Never extends the existing lifetime; useful to
    /// spread mass expiration over time.
    pub(crate) fn set_expire_until<R: Rng>(&self, max_delay: Duration, rng: &mut R) {
        let max_delay_secs = max_delay.as_secs().max(1) as u32;
        let delay_ms = (u64::from(rng.gen_range(0..max_delay_secs)) * 1000).max(1);

        let current_ms = internal_to_millis(self.max_cache_time.load(Ordering::Relaxed));
        if current_ms == 0 || delay_ms < current_ms {
            self.max_cache_time
                .store(duration_to_internal(delay_ms), Ordering::Relaxed);
        }
        // Otherwise the holder already expires sooner; keep it.
    }
}

impl<V> std::fmt::Debug for EntryHolder<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryHolder")
            .field("present", &self.value.read().is_some())
            .field("input_time", &self.input_offset())
            .field("last_access", &self.last_access_offset())
            .field("use_count", &self.use_count())
            .field("serialized", &self.is_serialized())
            .field("complete", &self.is_complete())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn test_clock() -> Arc<CoarseClock> {
        CoarseClock::start(Duration::from_millis(2))
    }

    fn completed(value: &str, idle_ms: u64, cache_ms: u64, clock: &CoarseClock) -> EntryHolder<String> {
        let holder = EntryHolder::new_plain(value.to_string());
        holder.complete(idle_ms, cache_ms, clock);
        holder
    }

    #[test]
    fn incomplete_holder_is_invalid() {
        let clock = test_clock();
        let holder: EntryHolder<String> = EntryHolder::new_plain("v".to_string());
        assert!(holder.is_invalid(&clock));
        holder.complete(0, 0, &clock);
        assert!(!holder.is_invalid(&clock));
    }

    #[test]
    fn peek_returns_value_without_touching_access_time() {
        let clock = test_clock();
        let holder = completed("v", 0, 0, &clock);
        let before = holder.last_access_offset();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(holder.peek(None).unwrap(), Some("v".to_string()));
        assert_eq!(holder.last_access_offset(), before);
    }

    #[test]
    fn get_touches_access_time() {
        let clock = test_clock();
        let holder = completed("v", 0, 0, &clock);
        let before = holder.last_access_offset();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(holder.get(None, &clock).unwrap(), Some("v".to_string()));
        assert!(holder.last_access_offset() > before);
    }

    #[test]
    fn release_wins_exactly_once() {
        let clock = test_clock();
        let holder = completed("v", 0, 0, &clock);
        assert!(holder.release());
        assert!(!holder.release());
        assert!(holder.is_invalid(&clock));
        assert_eq!(holder.peek(None).unwrap(), None);
    }

    #[test]
    fn released_holder_races_yield_one_winner() {
        let clock = test_clock();
        let holder = Arc::new(completed("v", 0, 0, &clock));
        let winners: Vec<bool> = std::thread::scope(|scope| {
            (0..8)
                .map(|_| {
                    let holder = Arc::clone(&holder);
                    scope.spawn(move || holder.release())
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect()
        });
        assert_eq!(winners.iter().filter(|&&won| won).count(), 1);
    }

    #[test]
    fn lifetime_bound_expires_entry() {
        let clock = test_clock();
        let holder = completed("v", 0, 40, &clock);
        assert!(!holder.is_invalid(&clock));
        std::thread::sleep(Duration::from_millis(100));
        assert!(holder.is_invalid(&clock));
    }

    #[test]
    fn idle_bound_expires_entry_and_reads_refresh_it() {
        let clock = test_clock();
        let holder = completed("v", 80, 0, &clock);
        std::thread::sleep(Duration::from_millis(50));
        let _ = holder.get(None, &clock).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // The mid-way read kept the entry alive.
        assert!(!holder.is_invalid(&clock));
        std::thread::sleep(Duration::from_millis(120));
        assert!(holder.is_invalid(&clock));
    }

    #[test]
    fn zero_bounds_never_expire() {
        let clock = test_clock();
        let holder = completed("v", 0, 0, &clock);
        std::thread::sleep(Duration::from_millis(60));
        assert!(!holder.is_invalid(&clock));
    }

    #[test]
    fn expire_until_never_extends() {
        let clock = test_clock();
        let holder = completed("v", 0, 1_000, &clock);
        let mut rng = rand::thread_rng();
        holder.set_expire_until(Duration::from_secs(3600), &mut rng);
        // Lifetime was 1s; a random delay of up to an hour must not extend it.
        assert!(internal_to_millis(holder.max_cache_time.load(Ordering::Relaxed)) <= 1_000);
    }

    #[test]
    fn expire_until_caps_unbounded_lifetime() {
        let clock = test_clock();
        let holder = completed("v", 0, 0, &clock);
        let mut rng = rand::thread_rng();
        holder.set_expire_until(Duration::from_secs(60), &mut rng);
        let capped = internal_to_millis(holder.max_cache_time.load(Ordering::Relaxed));
        assert!(capped >= 1, "entry must no longer be immortal");
        assert!(capped <= 60_000);
    }

    #[test]
    fn use_count_accumulates() {
        let clock = test_clock();
        let holder = completed("v", 0, 0, &clock);
        for _ in 0..5 {
            holder.increment_use_count();
        }
        assert_eq!(holder.use_count(), 5);
    }

    // -- compact time unit -------------------------------------------------

    #[test]
    fn compact_unit_keeps_zero() {
        assert_eq!(duration_to_internal(0), 0);
        assert_eq!(internal_to_millis(0), 0);
    }

    #[test]
    fn compact_unit_switches_to_seconds_for_large_values() {
        let large = u64::from(UNIT_VALUE_MASK) + 5_000;
        let internal = duration_to_internal(large);
        assert!(internal & UNIT_SECONDS != 0);
        assert_eq!(internal_to_millis(internal), (large / 1000) * 1000);
    }

    proptest! {
        #[test]
        fn compact_unit_millis_regime_is_exact(millis in 0u64..(1 << 31)) {
            prop_assert_eq!(internal_to_millis(duration_to_internal(millis)), millis);
        }

        #[test]
        fn compact_unit_seconds_regime_is_second_exact(millis in (1u64 << 31)..(1u64 << 40)) {
            let round_tripped = internal_to_millis(duration_to_internal(millis));
            prop_assert_eq!(round_tripped % 1000, 0);
            prop_assert!(millis - round_tripped < 1000);
        }
    }
}
