//! Cache statistics: counters, eviction rate, and hit-ratio averaging.
//!
//! ## Key Components
//!
//! - [`StatsRecorder`]: the recording seam. Mutating operations call it on
//!   every hit/miss/put/remove/drop and the eviction worker reports rounds,
//!   halts, and evicted counts.
//! - [`StandardStats`]: atomic counters plus a 60-bucket one-second
//!   sliding window for the eviction rate and a 5-sample moving average for
//!   the hit ratio, recomputed at most once per minute.
//! - [`NoopStats`]: installed when statistics are disabled; recording costs
//!   nothing and prior values are discarded.
//! - [`CacheStatistics`]: the snapshot handed to callers.
//!
//! Counters are plain relaxed atomic increments. A snapshot is consistent
//! with itself only relative to the recomputation that produced it, not to
//! concurrent mutators; eventual consistency is acceptable here.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Number of samples in the hit-ratio moving average.
const HIT_RATIO_SAMPLES: usize = 5;
/// Minimum time between two hit-ratio recomputations.
const HIT_RATIO_VALIDITY_MS: u64 = 60 * 1000;
/// Size of the eviction-rate window in one-second buckets.
const RATE_WINDOW_SECS: usize = 60;

/// Point-in-time view of a cache's counters.
///
/// All counters are cumulative since the recorder was installed; disabling
/// and re-enabling statistics resets them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStatistics {
    /// Cache id the snapshot belongs to.
    pub id: String,
    /// Successful reads.
    pub hits: u64,
    /// Reads that found no visible entry.
    pub misses: u64,
    /// Successful put-family mutations.
    pub puts: u64,
    /// Successful removals.
    pub removes: u64,
    /// Writes rejected under the DROP jam policy.
    pub drops: u64,
    /// Entries removed by the eviction worker.
    pub eviction_count: u64,
    /// Completed eviction rounds.
    pub eviction_rounds: u64,
    /// Times a writer found the cache over-full.
    pub eviction_halts: u64,
    /// Evicted entries within the trailing 60 s window.
    pub eviction_rate: u64,
    /// Hit ratio in percent (0–100), a 5-sample moving average.
    pub hit_ratio: f32,
    /// Best-effort entry count at snapshot time.
    pub element_count: usize,
}

/// Recording seam between cache operations and statistics.
pub trait StatsRecorder: Send + Sync {
    fn record_hit(&self);
    fn record_miss(&self);
    fn record_put(&self);
    fn record_remove(&self);
    fn record_drop(&self);
    /// Reports `count` entries evicted at `now_secs` (whole seconds).
    fn record_evictions(&self, now_secs: u64, count: u64);
    fn record_eviction_round(&self);
    fn record_eviction_halt(&self);
    /// Hit ratio in percent; may fold a new sample into the average.
    fn hit_ratio(&self, now_millis: u64) -> f32;
    /// Writes the counter values into a snapshot.
    fn fill(&self, now_millis: u64, now_secs: u64, out: &mut CacheStatistics);
}

// =============================================================================
// Sliding window counter
// =============================================================================

struct WindowState {
    counts: [u64; RATE_WINDOW_SECS],
    last_sec: u64,
}

/// Event counter over a ring of one-second buckets.
///
/// Buckets that the clock has passed since the previous call are zeroed
/// lazily, so an idle window decays to zero without a maintenance thread.
pub struct SlidingWindowCounter {
    state: Mutex<WindowState>,
}

impl SlidingWindowCounter {
    pub fn new() -> SlidingWindowCounter {
        SlidingWindowCounter {
            state: Mutex::new(WindowState {
                counts: [0; RATE_WINDOW_SECS],
                last_sec: 0,
            }),
        }
    }

    fn advance(state: &mut WindowState, now_sec: u64) {
        if now_sec <= state.last_sec {
            return;
        }
        let stale = (now_sec - state.last_sec).min(RATE_WINDOW_SECS as u64);
        for step in 1..=stale {
            let idx = ((state.last_sec + step) % RATE_WINDOW_SECS as u64) as usize;
            state.counts[idx] = 0;
        }
        state.last_sec = now_sec;
    }

    /// Registers `count` events at `now_sec`.
    pub fn register_events(&self, now_sec: u64, count: u64) {
        let mut state = self.state.lock();
        Self::advance(&mut state, now_sec);
        let idx = (now_sec % RATE_WINDOW_SECS as u64) as usize;
        state.counts[idx] += count;
    }

    /// Total events within the trailing window as of `now_sec`.
    pub fn rate_total(&self, now_sec: u64) -> u64 {
        let mut state = self.state.lock();
        Self::advance(&mut state, now_sec);
        state.counts.iter().sum()
    }
}

impl Default for SlidingWindowCounter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Standard recorder
// =============================================================================

struct HitRatioWindow {
    samples: [f32; HIT_RATIO_SAMPLES],
    index: usize,
    last_measurement_millis: u64,
    previous_hits: u64,
    previous_misses: u64,
}

/// Atomic-counter recorder used when statistics are enabled.
pub struct StandardStats {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removes: AtomicU64,
    drops: AtomicU64,
    eviction_count: AtomicU64,
    eviction_rounds: AtomicU64,
    eviction_halts: AtomicU64,
    eviction_rate: SlidingWindowCounter,
    ratio: Mutex<HitRatioWindow>,
}

impl StandardStats {
    pub fn new(now_millis: u64) -> StandardStats {
        StandardStats {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            eviction_rounds: AtomicU64::new(0),
            eviction_halts: AtomicU64::new(0),
            eviction_rate: SlidingWindowCounter::new(),
            ratio: Mutex::new(HitRatioWindow {
                samples: [0.0; HIT_RATIO_SAMPLES],
                index: 0,
                last_measurement_millis: now_millis,
                previous_hits: 0,
                previous_misses: 0,
            }),
        }
    }

    /// Folds a new sample into the window if the previous one is stale.
    ///
    /// The hit/miss deltas are snapshotted relative to this recomputation
    /// only; the counters themselves keep being incremented concurrently.
    fn maybe_sample(&self, window: &mut HitRatioWindow, now_millis: u64) {
        if now_millis <= window.last_measurement_millis + HIT_RATIO_VALIDITY_MS {
            return;
        }
        window.last_measurement_millis = now_millis;

        let hits_now = self.hits.load(Ordering::Relaxed);
        let misses_now = self.misses.load(Ordering::Relaxed);
        let hit_delta = hits_now - window.previous_hits;
        let miss_delta = misses_now - window.previous_misses;
        window.previous_hits = hits_now;
        window.previous_misses = misses_now;

        let gets = hit_delta + miss_delta;
        let sample = if gets == 0 {
            0.0
        } else {
            hit_delta as f32 / gets as f32 * 100.0
        };
        let index = window.index;
        window.samples[index] = sample;
        window.index = (index + 1) % HIT_RATIO_SAMPLES;
    }
}

impl StatsRecorder for StandardStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evictions(&self, now_secs: u64, count: u64) {
        self.eviction_count.fetch_add(count, Ordering::Relaxed);
        self.eviction_rate.register_events(now_secs, count);
    }

    fn record_eviction_round(&self) {
        self.eviction_rounds.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction_halt(&self) {
        self.eviction_halts.fetch_add(1, Ordering::Relaxed);
    }

    fn hit_ratio(&self, now_millis: u64) -> f32 {
        let mut window = self.ratio.lock();
        self.maybe_sample(&mut window, now_millis);
        window.samples.iter().sum::<f32>() / HIT_RATIO_SAMPLES as f32
    }

    fn fill(&self, now_millis: u64, now_secs: u64, out: &mut CacheStatistics) {
        out.hits = self.hits.load(Ordering::Relaxed);
        out.misses = self.misses.load(Ordering::Relaxed);
        out.puts = self.puts.load(Ordering::Relaxed);
        out.removes = self.removes.load(Ordering::Relaxed);
        out.drops = self.drops.load(Ordering::Relaxed);
        out.eviction_count = self.eviction_count.load(Ordering::Relaxed);
        out.eviction_rounds = self.eviction_rounds.load(Ordering::Relaxed);
        out.eviction_halts = self.eviction_halts.load(Ordering::Relaxed);
        out.eviction_rate = self.eviction_rate.rate_total(now_secs);
        out.hit_ratio = self.hit_ratio(now_millis);
    }
}

// =============================================================================
// No-op recorder
// =============================================================================

/// Recorder installed when statistics are disabled.
pub struct NoopStats;

impl StatsRecorder for NoopStats {
    fn record_hit(&self) {}
    fn record_miss(&self) {}
    fn record_put(&self) {}
    fn record_remove(&self) {}
    fn record_drop(&self) {}
    fn record_evictions(&self, _now_secs: u64, _count: u64) {}
    fn record_eviction_round(&self) {}
    fn record_eviction_halt(&self) {}

    fn hit_ratio(&self, _now_millis: u64) -> f32 {
        0.0
    }

    fn fill(&self, _now_millis: u64, _now_secs: u64, _out: &mut CacheStatistics) {}
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StandardStats::new(0);
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_put();
        stats.record_remove();
        stats.record_drop();
        stats.record_eviction_round();
        stats.record_eviction_halt();
        stats.record_evictions(10, 3);

        let mut out = CacheStatistics::default();
        stats.fill(0, 10, &mut out);
        assert_eq!(out.hits, 2);
        assert_eq!(out.misses, 1);
        assert_eq!(out.puts, 1);
        assert_eq!(out.removes, 1);
        assert_eq!(out.drops, 1);
        assert_eq!(out.eviction_count, 3);
        assert_eq!(out.eviction_rounds, 1);
        assert_eq!(out.eviction_halts, 1);
        assert_eq!(out.eviction_rate, 3);
    }

    #[test]
    fn hit_ratio_stays_within_bounds() {
        let stats = StandardStats::new(0);
        for _ in 0..10 {
            stats.record_hit();
        }
        stats.record_miss();

        // Force a sample past the validity window.
        let ratio = stats.hit_ratio(HIT_RATIO_VALIDITY_MS + 1);
        assert!((0.0..=100.0).contains(&ratio));

        // One 90.9% sample averaged over five slots.
        let expected = (10.0 / 11.0 * 100.0) / HIT_RATIO_SAMPLES as f32;
        assert!((ratio - expected).abs() < 0.01);
    }

    #[test]
    fn hit_ratio_is_rate_limited() {
        let stats = StandardStats::new(0);
        stats.record_hit();
        let first = stats.hit_ratio(HIT_RATIO_VALIDITY_MS + 1);
        // Another burst of hits within the validity window changes nothing.
        for _ in 0..100 {
            stats.record_hit();
        }
        let second = stats.hit_ratio(HIT_RATIO_VALIDITY_MS + 2);
        assert_eq!(first, second);
    }

    #[test]
    fn hit_ratio_samples_are_deltas() {
        let stats = StandardStats::new(0);
        stats.record_hit();
        stats.record_miss();
        let _ = stats.hit_ratio(HIT_RATIO_VALIDITY_MS + 1);
        // All misses in the second interval.
        stats.record_miss();
        stats.record_miss();
        let ratio = stats.hit_ratio(2 * (HIT_RATIO_VALIDITY_MS + 1));
        let expected = (50.0 + 0.0) / HIT_RATIO_SAMPLES as f32;
        assert!((ratio - expected).abs() < 0.01);
    }

    #[test]
    fn sliding_window_sums_recent_buckets() {
        let window = SlidingWindowCounter::new();
        window.register_events(100, 5);
        window.register_events(101, 7);
        assert_eq!(window.rate_total(101), 12);
    }

    #[test]
    fn sliding_window_expires_old_buckets() {
        let window = SlidingWindowCounter::new();
        window.register_events(100, 5);
        assert_eq!(window.rate_total(100 + RATE_WINDOW_SECS as u64), 0);
    }

    #[test]
    fn sliding_window_partial_decay() {
        let window = SlidingWindowCounter::new();
        window.register_events(100, 5);
        window.register_events(130, 2);
        // Second 100 is still inside the 60-bucket window as of second 130.
        assert_eq!(window.rate_total(130), 7);
        // By second 161, the events from second 100 have fallen out.
        assert_eq!(window.rate_total(161), 2);
    }

    #[test]
    fn noop_recorder_reports_nothing() {
        let stats = NoopStats;
        stats.record_hit();
        stats.record_evictions(5, 100);
        let mut out = CacheStatistics::default();
        stats.fill(0, 5, &mut out);
        assert_eq!(out, CacheStatistics::default());
        assert_eq!(stats.hit_ratio(0), 0.0);
    }
}
