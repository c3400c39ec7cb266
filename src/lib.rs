//! shelflife: concurrent in-process key/value caching with expiration,
//! bounded capacity, and pluggable background eviction.
//!
//! A [`Cache`] is built once from a [`CacheBuilder`] and then shared
//! freely; handles are cheap clones. Reads are optimized for concurrency:
//! the hot path touches a cached coarse clock instead of the OS, access
//! metadata is updated with relaxed atomics, and the storage map is
//! sharded. Expiration and capacity enforcement run in per-cache
//! background workers that restart on demand, so idle caches cost nothing.
//!
//! ```
//! use std::time::Duration;
//! use shelflife::config::CacheBuilder;
//! use shelflife::policy::EvictionPolicyChoice;
//!
//! let cache = CacheBuilder::new()
//!     .id("sessions")
//!     .expected_size(10_000)
//!     .max_idle_time(Duration::from_secs(1800))
//!     .eviction_policy(EvictionPolicyChoice::Lfu)
//!     .build()
//!     .unwrap();
//!
//! cache.put("sess-1".to_string(), "alice".to_string()).unwrap();
//! assert_eq!(cache.get(&"sess-1".to_string()).unwrap(), Some("alice".to_string()));
//!
//! let stats = cache.statistics();
//! assert_eq!(stats.hits, 1);
//! cache.close();
//! ```

pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod holder;
pub mod integration;
pub mod policy;
pub mod processor;
pub mod stats;

mod evictor;
mod store;
mod sweeper;

pub use cache::{Cache, CacheIter};
pub use config::{CacheBuilder, JamPolicy};
pub use error::{BoxError, CacheError};
pub use events::{CacheEvent, DispatchMode, EntryListener, EventKind, ListenerConfig};
pub use integration::{CacheLoader, CacheWriter, WriteFailure};
pub use policy::{EvictionPolicy, EvictionPolicyChoice, FrozenEntry, LfuEviction, LruEviction};
pub use processor::MutableEntry;
pub use stats::CacheStatistics;

#[cfg(feature = "serde-values")]
pub use codec::JsonCodec;
pub use codec::{ValueCodec, WriteMode};
