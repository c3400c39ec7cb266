//! Error types for the shelflife library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: Every failure a cache operation can surface, from
//!   lifecycle violations (`Closed`) over integration failures
//!   (`Loader`, `Writer`, `Processor`, `Serialization`) to configuration
//!   problems caught at build time (`InvalidConfig`, `DuplicateListener`).
//! - [`BoxError`]: The boxed source type used at the loader/writer/processor
//!   seams, so integrations can fail with whatever error type they like.
//!
//! Integration failures are wrapped exactly once: a loader error that
//! travels through a batch operation still carries the original source, and
//! a [`CacheError::Processor`] returned from inside an entry processor is
//! passed through instead of being wrapped a second time.
//!
//! ## Example Usage
//!
//! ```
//! use shelflife::config::CacheBuilder;
//! use shelflife::error::CacheError;
//!
//! let result = CacheBuilder::<u64, String>::new()
//!     .concurrency_level(0)
//!     .build();
//! assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
//! ```

use thiserror::Error;

/// Boxed error type accepted from loaders, writers, processors, and codecs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by cache operations.
///
/// Background workers never surface errors through this type; their
/// failures are logged and the worker slot is cleared so the next mutating
/// operation can restart it.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache has been closed; every operational method fails fast.
    #[error("cache `{0}` is closed")]
    Closed(String),

    /// The read-through loader failed for a key.
    #[error("read-through loader failed in cache `{cache}`")]
    Loader {
        /// Cache id the failure originated from.
        cache: String,
        #[source]
        source: BoxError,
    },

    /// The write-through writer failed. For batch mutations this wraps the
    /// batch failure after the unaffected entries were processed.
    #[error("write-through writer failed in cache `{cache}`")]
    Writer {
        /// Cache id the failure originated from.
        cache: String,
        #[source]
        source: BoxError,
    },

    /// An entry processor failed. Never double-wrapped: a processor that
    /// itself returns `CacheError::Processor` is propagated unchanged.
    #[error("entry processor failed")]
    Processor(#[source] BoxError),

    /// Encoding or decoding a value failed in `Serialize` write mode.
    #[error("value serialization failed")]
    Serialization(#[source] BoxError),

    /// The builder rejected the configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A listener with the same registration name already exists.
    #[error("listener `{0}` is already registered")]
    DuplicateListener(String),
}

impl CacheError {
    /// Wraps a foreign error as a processor failure, unless it already is
    /// one, in which case it is returned unchanged.
    pub(crate) fn from_processor(err: BoxError) -> CacheError {
        match err.downcast::<CacheError>() {
            Ok(cache_err) if matches!(*cache_err, CacheError::Processor(_)) => *cache_err,
            Ok(other) => CacheError::Processor(other),
            Err(err) => CacheError::Processor(err),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(msg: &str) -> BoxError {
        msg.to_string().into()
    }

    #[test]
    fn closed_names_the_cache() {
        let err = CacheError::Closed("sessions".to_string());
        assert_eq!(err.to_string(), "cache `sessions` is closed");
    }

    #[test]
    fn loader_carries_source() {
        let err = CacheError::Loader {
            cache: "c1".to_string(),
            source: boxed("db down"),
        };
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "db down");
    }

    #[test]
    fn processor_error_is_not_double_wrapped() {
        let inner = CacheError::Processor(boxed("boom"));
        let rewrapped = CacheError::from_processor(Box::new(inner));
        match rewrapped {
            CacheError::Processor(source) => assert_eq!(source.to_string(), "boom"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn foreign_error_is_wrapped_once() {
        let err = CacheError::from_processor(boxed("user failure"));
        match err {
            CacheError::Processor(source) => assert_eq!(source.to_string(), "user failure"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
