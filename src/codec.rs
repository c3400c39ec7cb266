//! Store-by-value support.
//!
//! In `Serialize` write mode the cache encodes values on put and decodes on
//! every read, so callers cannot mutate cached state by retaining the
//! reference they inserted — the observable semantics are as-if by copy.
//! The core only fixes the seam: [`ValueCodec`] turns values into bytes and
//! back, and [`WriteMode`] selects whether the seam is used at all.
//!
//! ## Key Components
//!
//! - [`WriteMode`]: `Identity` (values shared as inserted) or `Serialize`
//!   (values stored as encoded bytes).
//! - [`ValueCodec`]: the encode/decode seam; failures surface as
//!   [`CacheError::Serialization`](crate::error::CacheError::Serialization).
//! - [`JsonCodec`]: the default codec built on serde_json, available with
//!   the `serde-values` feature (on by default).
//!
//! ## Example Usage
//!
//! ```
//! # #[cfg(feature = "serde-values")] {
//! use shelflife::codec::{JsonCodec, ValueCodec};
//!
//! let codec = JsonCodec;
//! let bytes = ValueCodec::<String>::encode(&codec, &"hello".to_string()).unwrap();
//! let back: String = codec.decode(&bytes).unwrap();
//! assert_eq!(back, "hello");
//! # }
//! ```

use crate::error::BoxError;

/// How values are stored inside the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Values are stored as inserted and shared with readers.
    #[default]
    Identity,
    /// Values are encoded on put and decoded on read (store-by-value).
    Serialize,
}

/// Encodes and decodes cached values for the `Serialize` write mode.
pub trait ValueCodec<V>: Send + Sync {
    /// Encodes a value into its stored byte form.
    fn encode(&self, value: &V) -> Result<Vec<u8>, BoxError>;

    /// Decodes a value from its stored byte form.
    fn decode(&self, bytes: &[u8]) -> Result<V, BoxError>;
}

/// serde_json-backed codec, the default for store-by-value caches.
#[cfg(feature = "serde-values")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "serde-values")]
impl<V> ValueCodec<V> for JsonCodec
where
    V: serde::Serialize + serde::de::DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, BoxError> {
        serde_json::to_vec(value).map_err(|e| Box::new(e) as BoxError)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, BoxError> {
        serde_json::from_slice(bytes).map_err(|e| Box::new(e) as BoxError)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(all(test, feature = "serde-values"))]
mod tests {
    use super::*;

    #[test]
    fn json_codec_round_trips() {
        let codec = JsonCodec;
        let value = vec![1u32, 2, 3];
        let bytes = codec.encode(&value).unwrap();
        let back: Vec<u32> = codec.decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn json_codec_reports_garbage() {
        let codec = JsonCodec;
        let result: Result<String, _> = codec.decode(b"\xff\xfe not json");
        assert!(result.is_err());
    }
}
