// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Opaque references to kernel-resident objects

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Largest hash value a handle may carry (2^53 - 1, exact in an IEEE double)
pub const MAX_HASH: u64 = (1 << 53) - 1;

const HASH_FIELD: &str = "hash";
const KIND_FIELD: &str = "kindTag";

/// Inert token naming an object inside one executor's store.
///
/// A handle owns nothing. It is only meaningful to the executor that minted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    pub hash: u64,
    #[serde(rename = "kindTag")]
    pub kind_tag: String,
}

impl Handle {
    pub fn new(hash: u64, kind_tag: impl Into<String>) -> Self {
        Self {
            hash,
            kind_tag: kind_tag.into(),
        }
    }

    /// Recognize a handle embedded in a JSON value.
    ///
    /// Only an object with exactly the two fields `hash` (unsigned integer) and
    /// `kindTag` (string) is a handle; anything else is plain data.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.len() != 2 {
            return None;
        }
        let hash = map.get(HASH_FIELD)?.as_u64()?;
        let kind_tag = map.get(KIND_FIELD)?.as_str()?;
        Some(Self::new(hash, kind_tag))
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(2);
        map.insert(HASH_FIELD.to_string(), Value::from(self.hash));
        map.insert(KIND_FIELD.to_string(), Value::from(self.kind_tag.clone()));
        Value::Object(map)
    }

    /// Collect every handle embedded anywhere in `value`, depth-first.
    pub fn collect(value: &Value, out: &mut Vec<Handle>) {
        if let Some(handle) = Self::from_value(value) {
            out.push(handle);
            return;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    Self::collect(item, out);
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    Self::collect(item, out);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind_tag, self.hash)
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        handle.to_value()
    }
}
