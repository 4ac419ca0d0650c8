//! Value codec
//!
//! User values are serialized with MessagePack (`rmp-serde`): compact,
//! self-describing enough to round-trip any `serde` type, and stable across
//! processes. Everything stored in a ref history entry or an atom data node
//! goes through this pair of functions.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a value to MessagePack bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Decode a value from MessagePack bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
