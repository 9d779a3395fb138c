//! Value codecs.
//!
//! A dataset never serializes values itself; it is handed a [`Codec`] that
//! turns its in-memory value into the bytes kept under the data key.

use serde::{de::DeserializeOwned, Serialize};
use std::any::type_name;

use crate::error::CodecError;

/// Encodes and decodes dataset values to and from store bytes.
///
/// Implementations must be deterministic enough that a value decoded by one
/// process equals the value encoded by another.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            type_name: type_name::<T>().to_string(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            type_name: type_name::<T>().to_string(),
            reason: e.to_string(),
        })
    }
}
