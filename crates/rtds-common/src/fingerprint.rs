//! Record fingerprints
//!
//! A fingerprint is the SHA-256 of a record's canonical JSON encoding
//! (object keys sorted, no insignificant whitespace). Two records that
//! differ only in key order share a fingerprint, so the read path can
//! collapse duplicates written by retried chunks.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the hex-encoded fingerprint of a record value
pub fn record_fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hash_canonical(&mut hasher, value);
    hex::encode(hasher.finalize())
}

/// Approximate in-memory footprint of a record, in bytes of canonical JSON
pub fn approx_record_bytes(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(b) => {
            if *b {
                4
            } else {
                5
            }
        },
        Value::Number(n) => n.to_string().len(),
        // quotes plus escapes are close enough to the raw length
        Value::String(s) => s.len() + 2,
        Value::Array(items) => 2 + items.iter().map(|v| approx_record_bytes(v) + 1).sum::<usize>(),
        Value::Object(map) => {
            2 + map
                .iter()
                .map(|(k, v)| k.len() + 4 + approx_record_bytes(v))
                .sum::<usize>()
        },
    }
}

fn hash_canonical(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            hasher.update(b"{");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_scalar(hasher, &Value::String(key.clone()));
                hasher.update(b":");
                if let Some(inner) = map.get(key) {
                    hash_canonical(hasher, inner);
                }
            }
            hasher.update(b"}");
        },
        Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_canonical(hasher, item);
            }
            hasher.update(b"]");
        },
        scalar => hash_scalar(hasher, scalar),
    }
}

fn hash_scalar(hasher: &mut Sha256, value: &Value) {
    // Scalars serialize identically regardless of map ordering
    hasher.update(value.to_string().as_bytes());
}
