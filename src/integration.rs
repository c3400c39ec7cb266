//! Read-through and write-through integration seams.
//!
//! ## Key Components
//!
//! - [`CacheLoader`]: resolves values the cache does not hold. Triggered
//!   only by `get`, `get_all`, `load_all`, and by an entry processor
//!   finding its key absent.
//! - [`CacheWriter`]: mirrors mutations to an external system *before* the
//!   local map changes. When the writer fails, the local mutation is not
//!   applied and the caller observes a
//!   [`CacheError::Writer`](crate::error::CacheError::Writer).
//! - [`WriteFailure`]: a batch writer failure naming the keys that were
//!   not written. The cache skips those keys locally, finishes the rest of
//!   the batch, and surfaces the wrapped failure at the end.
//!
//! The default batch implementations loop over the single-entry methods
//! and treat the failing entry plus everything after it as rejected, which
//! is the contract a transactional backend gives you for free.

use crate::error::BoxError;

/// Loads values on cache misses (read-through).
pub trait CacheLoader<K, V>: Send + Sync {
    /// Resolves the value for `key`. `Ok(None)` means the external system
    /// has no value either; the cache records a miss and stores nothing.
    fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

    /// Bulk load. The default loops over [`load`](Self::load) and skips
    /// keys the backend has no value for.
    fn load_all(&self, keys: &[K]) -> Result<Vec<(K, V)>, BoxError>
    where
        K: Clone,
    {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key)? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }
}

/// A batch write-through failure: `failed_keys` were not applied by the
/// writer and must not be applied locally either.
pub struct WriteFailure<K> {
    /// Keys the writer rejected, in batch order.
    pub failed_keys: Vec<K>,
    /// The underlying failure.
    pub source: BoxError,
}

impl<K> std::fmt::Debug for WriteFailure<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteFailure")
            .field("failed_keys", &self.failed_keys.len())
            .field("source", &self.source)
            .finish()
    }
}

/// Mirrors cache mutations to an external system (write-through).
pub trait CacheWriter<K, V>: Send + Sync {
    /// Writes one entry. Called before the local map is mutated.
    fn write(&self, key: &K, value: &V) -> Result<(), BoxError>;

    /// Deletes one entry. Called before the local map is mutated.
    fn delete(&self, key: &K) -> Result<(), BoxError>;

    /// Batch write. On failure, the failing entry and everything after it
    /// count as rejected.
    fn write_all(&self, entries: &[(K, V)]) -> Result<(), WriteFailure<K>>
    where
        K: Clone,
    {
        for (idx, (key, value)) in entries.iter().enumerate() {
            if let Err(source) = self.write(key, value) {
                return Err(WriteFailure {
                    failed_keys: entries[idx..].iter().map(|(k, _)| k.clone()).collect(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Batch delete. On failure, the failing key and everything after it
    /// count as rejected.
    fn delete_all(&self, keys: &[K]) -> Result<(), WriteFailure<K>>
    where
        K: Clone,
    {
        for (idx, key) in keys.iter().enumerate() {
            if let Err(source) = self.delete(key) {
                return Err(WriteFailure {
                    failed_keys: keys[idx..].to_vec(),
                    source,
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperLoader;

    impl CacheLoader<String, String> for UpperLoader {
        fn load(&self, key: &String) -> Result<Option<String>, BoxError> {
            if key == "missing" {
                Ok(None)
            } else {
                Ok(Some(key.to_uppercase()))
            }
        }
    }

    struct RejectingWriter;

    impl CacheWriter<String, String> for RejectingWriter {
        fn write(&self, key: &String, _value: &String) -> Result<(), BoxError> {
            if key == "bad" {
                Err("rejected".into())
            } else {
                Ok(())
            }
        }

        fn delete(&self, key: &String) -> Result<(), BoxError> {
            if key == "bad" {
                Err("rejected".into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn default_load_all_skips_absent_keys() {
        let loader = UpperLoader;
        let keys = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let loaded = loader.load_all(&keys).unwrap();
        assert_eq!(
            loaded,
            vec![
                ("a".to_string(), "A".to_string()),
                ("b".to_string(), "B".to_string()),
            ]
        );
    }

    #[test]
    fn default_write_all_reports_tail_as_failed() {
        let writer = RejectingWriter;
        let entries = vec![
            ("a".to_string(), "1".to_string()),
            ("bad".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ];
        let failure = writer.write_all(&entries).unwrap_err();
        assert_eq!(failure.failed_keys, vec!["bad".to_string(), "c".to_string()]);
        assert_eq!(failure.source.to_string(), "rejected");
    }

    #[test]
    fn default_delete_all_reports_tail_as_failed() {
        let writer = RejectingWriter;
        let keys = vec!["a".to_string(), "bad".to_string(), "c".to_string()];
        let failure = writer.delete_all(&keys).unwrap_err();
        assert_eq!(failure.failed_keys, vec!["bad".to_string(), "c".to_string()]);
    }
}
