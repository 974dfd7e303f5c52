//! Canonical JSON and intent hashing.
//!
//! Canonical form = recursively sorted object keys, compact encoding. The
//! same canonicalization underpins the audit hash chain and the intent hash
//! that approval tokens commit to, so both must agree byte-for-byte across
//! runs.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::intent::OrderIntent;

/// Recursively sort object keys; arrays keep their order.
pub fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Serialize to canonical JSON (sorted keys, compact).
pub fn canonical_json<T: Serialize>(v: &T) -> serde_json::Result<String> {
    let raw = serde_json::to_value(v)?;
    serde_json::to_string(&sort_keys(&raw))
}

/// SHA-256 of the given bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Deterministic digest of an intent's semantic fields.
///
/// `OrderIntent` carries no generated identifiers, so the whole struct is
/// hashed. Optional fields that are `None` are omitted from the encoding
/// entirely (not serialized as null), so adding a price later changes the
/// hash.
pub fn intent_hash(intent: &OrderIntent) -> String {
    let canonical = canonical_json(intent).expect("intent serialization must not fail");
    sha256_hex(canonical.as_bytes())
}
