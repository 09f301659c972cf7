//! # EntiGrid Codec
//!
//! Property values and CBOR serialization for EntiGrid.
//!
//! Every row EntiGrid writes to the column store is a CBOR document produced
//! from a serde type. Encoding is deterministic for the types EntiGrid uses
//! (struct fields in declaration order, maps sorted by key), so encoded
//! values can be used inside row keys.
//!
//! ## Usage
//!
//! ```
//! use entigrid_codec::{from_slice, to_vec, Value};
//!
//! let value = Value::Integer(42);
//! let bytes = to_vec(&value).unwrap();
//! let decoded: Value = from_slice(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod value;

pub use error::{CodecError, CodecResult};
pub use value::Value;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a serde value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the value cannot be serialized.
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes CBOR bytes into a serde value.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR for `T`.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
