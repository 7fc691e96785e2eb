//! Serialization seam for wire payloads and cached values.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;
use crate::types::Value;

/// Turns typed values into bytes and back.
pub trait Codec: Send + Sync {
    /// Encodes `value` into bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the value cannot be represented.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decodes bytes produced by [`Codec::serialize`].
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes do not describe a `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// `MsgPack` codec using named (map) encoding for structs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Converts a typed argument or return value into a wire [`Value`].
///
/// # Errors
///
/// Returns `CodecError::Encode` if `value` cannot be represented as `MsgPack`.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    rmpv::ext::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Converts a wire [`Value`] into a typed value.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the value does not describe a `T`.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    rmpv::ext::from_value(value).map_err(|e| CodecError::Decode(e.to_string()))
}
