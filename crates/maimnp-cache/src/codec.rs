//! Value encoding for the backend wire format.
//!
//! A stored value is always a string: either [`NULL_SENTINEL`], marking a
//! cached absence, or a UTF-8 JSON document.
//!
//! Three kinds of values are encoded:
//! - validated models and plain values through their `Serialize` impl
//! - entity records through [`ColumnRecord`], which keeps column values only
//!   and leaves relationships out
//! - ad-hoc `serde_json::Value` documents as-is

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::SerializationError;

/// Stored in place of a value when the primary source returned nothing.
pub const NULL_SENTINEL: &str = "__MAIMNP_NULL__";

/// TTL applied to cached absences, whatever TTL the caller asked for.
pub const NULL_TTL: Duration = Duration::from_secs(60);

/// A persisted entity that can be flattened to its column values.
///
/// Implementations must only return scalar columns: related entities are
/// reloaded from the primary store, never cached inline.
pub trait ColumnRecord {
    fn column_values(&self) -> Map<String, Value>;
}

/// Serializes an entity through its [`ColumnRecord`] projection.
pub struct Columns<'a, E: ColumnRecord + ?Sized>(pub &'a E);

impl<E: ColumnRecord + ?Sized> Serialize for Columns<'_, E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.column_values().serialize(serializer)
    }
}

/// Encodes a value for storage.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, SerializationError> {
    serde_json::to_string(value).map_err(|e| SerializationError::Encode(e.to_string()))
}

/// Encodes an optional value, mapping `None` to [`NULL_SENTINEL`].
pub fn encode_optional<T: Serialize>(value: Option<&T>) -> Result<String, SerializationError> {
    match value {
        Some(v) => encode(v),
        None => Ok(NULL_SENTINEL.to_string()),
    }
}

/// Decodes a stored JSON document.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, SerializationError> {
    serde_json::from_str(raw).map_err(|e| SerializationError::Decode(e.to_string()))
}

#[inline]
pub fn is_null_sentinel(raw: &str) -> bool {
    raw == NULL_SENTINEL
}
