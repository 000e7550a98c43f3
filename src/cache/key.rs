// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Deterministic cache keys for (operation, inputs) pairs
//!
//! Inputs are fed to SHA-256 through a canonical, type-tagged and length-prefixed
//! encoding, so that:
//! - numbers compare by value (`1`, `1.0` and `1e0` encode identically, `-0.0` equals `0.0`)
//! - object field order never matters
//! - embedded handles contribute their own `{hash, kindTag}` identity, never the
//!   content of the object they name
//!
//! The digest is truncated to 53 bits so that the key survives a round trip through a
//! JavaScript number.

use crate::handle::{Handle, MAX_HASH};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

const DOMAIN: &[u8] = b"polyframe-bridge/v1";

/// 2^53: integers up to this magnitude are exact as f64
const EXACT_INT_LIMIT: u64 = 1 << 53;

/// Compute the cache key of an operation call
pub fn cache_key(function: &str, inputs: &Value) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN);
    write_str(&mut hasher, function);
    write_value(&mut hasher, inputs);

    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes) & MAX_HASH
}

fn write_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn write_str(hasher: &mut Sha256, s: &str) {
    hasher.update(b"s");
    write_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn write_value(hasher: &mut Sha256, value: &Value) {
    if let Some(handle) = Handle::from_value(value) {
        hasher.update(b"h");
        hasher.update(handle.hash.to_le_bytes());
        write_str(hasher, &handle.kind_tag);
        return;
    }

    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(true) => hasher.update(b"t"),
        Value::Bool(false) => hasher.update(b"f"),
        Value::Number(n) => write_number(hasher, n),
        Value::String(s) => write_str(hasher, s),
        Value::Array(items) => {
            hasher.update(b"[");
            write_len(hasher, items.len());
            for item in items {
                write_value(hasher, item);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            hasher.update(b"{");
            write_len(hasher, entries.len());
            for (key, item) in entries {
                write_str(hasher, key);
                write_value(hasher, item);
            }
        }
    }
}

fn write_number(hasher: &mut Sha256, n: &Number) {
    // Large integers keep full precision; everything else compares as f64.
    if let Some(u) = n.as_u64() {
        if u > EXACT_INT_LIMIT {
            hasher.update(b"i");
            hasher.update((u as i128).to_le_bytes());
            return;
        }
    } else if let Some(i) = n.as_i64() {
        if i.unsigned_abs() > EXACT_INT_LIMIT {
            hasher.update(b"i");
            hasher.update((i as i128).to_le_bytes());
            return;
        }
    }

    let f = n.as_f64().unwrap_or(0.0);
    let f = if f == 0.0 { 0.0 } else { f };
    hasher.update(b"d");
    hasher.update(f.to_bits().to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_deterministic() {
        let inputs = json!({"size": [1, 1, 1], "center": false});
        assert_eq!(
            cache_key("kernel.shapes.cube", &inputs),
            cache_key("kernel.shapes.cube", &inputs)
        );
    }

    #[test]
    fn test_key_fits_in_double() {
        let key = cache_key("kernel.shapes.cube", &json!({"size": 3}));
        assert!(key <= MAX_HASH);
        assert_eq!(key as f64 as u64, key);
    }

    #[test]
    fn test_function_name_participates() {
        let inputs = json!({"size": 1});
        assert_ne!(
            cache_key("kernel.shapes.cube", &inputs),
            cache_key("kernel.shapes.sphere", &inputs)
        );
    }

    #[test]
    fn test_numeric_representations_agree() {
        let ints = json!({"size": [1, 2, 3]});
        let floats = json!({"size": [1.0, 2.0, 3.0]});
        assert_eq!(cache_key("op", &ints), cache_key("op", &floats));
        assert_eq!(cache_key("op", &json!(0.0)), cache_key("op", &json!(-0.0)));
        assert_eq!(cache_key("op", &json!(-5)), cache_key("op", &json!(-5.0)));
    }

    #[test]
    fn test_type_tags_prevent_collisions() {
        assert_ne!(cache_key("op", &json!(1)), cache_key("op", &json!("1")));
        assert_ne!(cache_key("op", &json!(["ab"])), cache_key("op", &json!(["a", "b"])));
        assert_ne!(cache_key("op", &json!(null)), cache_key("op", &json!(false)));
        assert_ne!(cache_key("op", &json!([[1], 2])), cache_key("op", &json!([1, [2]])));
    }

    #[test]
    fn test_large_integers_keep_precision() {
        let a = json!(9_007_199_254_740_993u64);
        let b = json!(9_007_199_254_740_992u64);
        assert_ne!(cache_key("op", &a), cache_key("op", &b));
    }

    #[test]
    fn test_handles_hash_by_identity() {
        let a = json!({"shape": {"hash": 7, "kindTag": "manifold-shape"}});
        let b = json!({"shape": {"kindTag": "manifold-shape", "hash": 7}});
        let c = json!({"shape": {"hash": 7, "kindTag": "manifold-cross-section"}});
        assert_eq!(cache_key("op", &a), cache_key("op", &b));
        assert_ne!(cache_key("op", &a), cache_key("op", &c));
    }
}
