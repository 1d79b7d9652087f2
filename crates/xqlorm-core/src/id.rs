//! Entity identity: primary-key text and watch identifiers

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator placed between the values of a composite primary key
pub const KEY_SEPARATOR: char = '|';

/// Identifier of a watched entity, derived from its type name and primary key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchId(u64);

impl WatchId {
    /// Hash an entity name together with its primary-key text
    pub fn new(entity: &str, primary_key: &str) -> Self {
        let mut buf = Vec::with_capacity(entity.len() + primary_key.len() + 1);
        buf.extend_from_slice(entity.as_bytes());
        buf.push(0);
        buf.extend_from_slice(primary_key.as_bytes());
        Self(xxhash_rust::xxh3::xxh3_64(&buf))
    }

    /// Get the internal numeric representation
    pub fn as_internal(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchId({:016x})", self.0)
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Concatenate primary-key values; `None` if any of them is null
pub fn primary_key_text<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut key = String::new();
    let mut first = true;
    for value in values {
        if value.is_null() {
            return None;
        }
        if !first {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&value.to_string());
        first = false;
    }

    // An entity without primary-key properties has no identity
    if first { None } else { Some(key) }
}
