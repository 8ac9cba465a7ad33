//! Canonical property serialization and the sync hash.
//!
//! The sync hash is the sole content identity used by the reconciliation
//! engine: a deterministic 160-bit SHA-1 digest over an entity's user
//! properties, with temporal metadata stripped. Two states hash equal if
//! and only if their user-property projections are deep-equal.

use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::models::PropMap;

/// Serialize a JSON value canonically: object keys sorted, list order
/// preserved, numbers/booleans/nulls intact, recursion into nested maps.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        // serde_json's escaping is deterministic for a given string.
        Value::String(_) => out.push_str(&value.to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Strip `_`-prefixed temporal metadata keys from a property map.
pub fn user_props(props: &PropMap) -> PropMap {
    props
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Compute the 160-bit sync hash of an entity's user properties:
/// strip `_` keys, canonicalize, SHA-1, lowercase hex.
pub fn compute_sync_hash(props: &PropMap) -> String {
    let stripped = user_props(props);
    let canonical = canonical_json(&Value::Object(stripped));
    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deep structural equality over the user-property projections of two maps.
pub fn user_props_equal(a: &PropMap, b: &PropMap) -> bool {
    Value::Object(user_props(a)) == Value::Object(user_props(b))
}
