//! Cache configuration and builder.
//!
//! ## Key Components
//!
//! - [`CacheBuilder`]: the only way to construct a
//!   [`Cache`](crate::cache::Cache). Unset options fall back to the
//!   defaults below; `build()` validates the combination and returns
//!   [`CacheError::InvalidConfig`](crate::error::CacheError::InvalidConfig)
//!   for the ones that cannot work.
//! - [`JamPolicy`]: what a writer does when the cache is over-full.
//!
//! | Option | Effect | Default |
//! |---|---|---|
//! | `id` | Human-readable cache name. | `cache-<n>` |
//! | `max_idle_time` | Inactivity before expiry (zero = never). | 30 min |
//! | `max_cache_time` | Absolute lifetime (zero = never). | 60 min |
//! | `max_cache_time_spread` | Uniform random seconds added per entry. | 0 |
//! | `expected_size` | Target user capacity; also sizes the map. | 10000 |
//! | `concurrency_level` | Expected concurrent writers; tunes sharding. | 14 |
//! | `eviction_policy` | LFU, LRU, custom, or none (unbounded). | LFU |
//! | `jam_policy` | WAIT or DROP when over-full. | WAIT |
//! | `statistics` | Enable counters. | on |
//! | `write_mode` | Identity or store-by-value. | Identity |
//! | `loader` / `writer` | Read-through / write-through seams. | — |
//! | `cleanup_interval` | Sweeper interval. | `max_idle_time` / 10 |
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use shelflife::config::CacheBuilder;
//! use shelflife::policy::EvictionPolicyChoice;
//!
//! let cache = CacheBuilder::new()
//!     .id("sessions")
//!     .expected_size(4096)
//!     .max_idle_time(Duration::from_secs(600))
//!     .eviction_policy(EvictionPolicyChoice::Lru)
//!     .build()
//!     .unwrap();
//! cache.put("user-1".to_string(), 42u64).unwrap();
//! assert_eq!(cache.get(&"user-1".to_string()).unwrap(), Some(42));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::codec::{ValueCodec, WriteMode};
use crate::error::CacheError;
use crate::integration::{CacheLoader, CacheWriter};
use crate::policy::{EvictionPolicy, EvictionPolicyChoice, LfuEviction, LruEviction};

/// Counter behind auto-generated cache ids.
static ANONYMOUS_CACHE_ID: AtomicU64 = AtomicU64::new(0);

/// Shortest sweeper interval the builder will configure.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(10);

/// Behavior of a foreground writer when the cache is over-full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JamPolicy {
    /// Block until the eviction worker has made room.
    #[default]
    Wait,
    /// Count a drop and report "not stored" to the caller.
    Drop,
}

/// Builder for [`Cache`] instances.
pub struct CacheBuilder<K, V> {
    pub(crate) id: Option<String>,
    pub(crate) max_idle_time: Duration,
    pub(crate) max_cache_time: Duration,
    pub(crate) max_cache_time_spread: Duration,
    pub(crate) expected_size: usize,
    pub(crate) concurrency_level: usize,
    pub(crate) eviction_policy: EvictionPolicyChoice,
    pub(crate) eviction_custom: Option<Arc<dyn EvictionPolicy<K, V>>>,
    pub(crate) jam_policy: JamPolicy,
    pub(crate) statistics: bool,
    pub(crate) write_mode: WriteMode,
    pub(crate) codec: Option<Arc<dyn ValueCodec<V>>>,
    pub(crate) loader: Option<Arc<dyn CacheLoader<K, V>>>,
    pub(crate) writer: Option<Arc<dyn CacheWriter<K, V>>>,
    pub(crate) cleanup_interval: Option<Duration>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        CacheBuilder {
            id: None,
            max_idle_time: Duration::from_secs(1800),
            max_cache_time: Duration::from_secs(3600),
            max_cache_time_spread: Duration::ZERO,
            expected_size: 10_000,
            concurrency_level: 14,
            eviction_policy: EvictionPolicyChoice::Lfu,
            eviction_custom: None,
            jam_policy: JamPolicy::Wait,
            statistics: true,
            write_mode: WriteMode::Identity,
            codec: None,
            loader: None,
            writer: None,
            cleanup_interval: None,
        }
    }
}

impl<K, V> CacheBuilder<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Human-readable cache name, used in logs and error messages.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Maximum inactivity before an entry expires. Zero disables idle
    /// expiry.
    pub fn max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    /// Maximum absolute lifetime of an entry. Zero disables age expiry.
    pub fn max_cache_time(mut self, max_cache_time: Duration) -> Self {
        self.max_cache_time = max_cache_time;
        self
    }

    /// Adds a uniform random duration (whole seconds) to each entry's
    /// lifetime, so mass inserts do not all expire at once.
    pub fn max_cache_time_spread(mut self, spread: Duration) -> Self {
        self.max_cache_time_spread = spread;
        self
    }

    /// Target user capacity of a bounded cache; also sizes the map.
    pub fn expected_size(mut self, expected_size: usize) -> Self {
        self.expected_size = expected_size;
        self
    }

    /// Expected number of concurrently writing threads; tunes the shard
    /// count of the storage map.
    pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
        self.concurrency_level = concurrency_level;
        self
    }

    /// Selects the eviction policy. `None` makes the cache unbounded.
    pub fn eviction_policy(mut self, policy: EvictionPolicyChoice) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Provides the policy implementation for
    /// [`EvictionPolicyChoice::Custom`]. Setting this implies `Custom`.
    pub fn eviction_custom(mut self, policy: Arc<dyn EvictionPolicy<K, V>>) -> Self {
        self.eviction_custom = Some(policy);
        self.eviction_policy = EvictionPolicyChoice::Custom;
        self
    }

    /// What writers do when the cache is over-full.
    pub fn jam_policy(mut self, jam_policy: JamPolicy) -> Self {
        self.jam_policy = jam_policy;
        self
    }

    /// Enables or disables statistics recording.
    pub fn statistics(mut self, statistics: bool) -> Self {
        self.statistics = statistics;
        self
    }

    /// Selects identity storage or store-by-value. `Serialize` requires a
    /// codec.
    pub fn write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// The codec used in `Serialize` write mode.
    pub fn codec(mut self, codec: Arc<dyn ValueCodec<V>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Read-through loader consulted on misses.
    pub fn loader(mut self, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Write-through writer invoked before local mutations.
    pub fn writer(mut self, writer: Arc<dyn CacheWriter<K, V>>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Overrides the sweeper interval. Defaults to a tenth of
    /// `max_idle_time`.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub(crate) fn resolve_id(&mut self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("cache-{}", ANONYMOUS_CACHE_ID.fetch_add(1, Ordering::Relaxed) + 1))
    }

    pub(crate) fn resolve_cleanup_interval(&self) -> Duration {
        let interval = self.cleanup_interval.unwrap_or_else(|| {
            if self.max_idle_time.is_zero() {
                Duration::from_secs(60)
            } else {
                self.max_idle_time / 10
            }
        });
        interval.max(MIN_CLEANUP_INTERVAL)
    }

    /// Resolves the effective eviction policy, or `None` for an unbounded
    /// cache.
    pub(crate) fn resolve_policy(
        &self,
    ) -> Result<Option<Arc<dyn EvictionPolicy<K, V>>>, CacheError> {
        if let Some(custom) = &self.eviction_custom {
            return Ok(Some(Arc::clone(custom)));
        }
        match self.eviction_policy {
            EvictionPolicyChoice::Lfu => Ok(Some(Arc::new(LfuEviction))),
            EvictionPolicyChoice::Lru => Ok(Some(Arc::new(LruEviction))),
            EvictionPolicyChoice::Custom => Err(CacheError::InvalidConfig(
                "eviction policy CUSTOM requires eviction_custom".to_string(),
            )),
            EvictionPolicyChoice::None => Ok(None),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        if self.concurrency_level < 1 {
            return Err(CacheError::InvalidConfig(
                "concurrency_level must be at least 1".to_string(),
            ));
        }
        if self.eviction_policy != EvictionPolicyChoice::None && self.expected_size == 0 {
            return Err(CacheError::InvalidConfig(
                "bounded cache requires expected_size > 0".to_string(),
            ));
        }
        if self.write_mode == WriteMode::Serialize && self.codec.is_none() {
            return Err(CacheError::InvalidConfig(
                "write mode Serialize requires a codec".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of storage shards, following the map tuning rule of the
    /// expected writer count plus headroom with a floor of eight.
    pub(crate) fn shard_count(&self) -> usize {
        self.concurrency_level.saturating_add(2).max(8)
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Validates the configuration and builds the cache.
    pub fn build(self) -> Result<Cache<K, V>, CacheError> {
        Cache::from_builder(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
