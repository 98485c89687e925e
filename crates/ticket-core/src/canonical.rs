//! Canonical JSON serialization.
//!
//! Every content-derived id in this crate (operations, identities) is a
//! BLAKE3 hash over the canonical form produced here: compact output with
//! object keys sorted lexicographically at every depth. Two replicas that
//! hold the same logical value therefore always derive the same id.

use serde::Serialize;
use serde_json::Value;

/// Produce a canonical JSON string from a [`serde_json::Value`].
///
/// ```
/// use serde_json::json;
/// use ticket_core::canonical::canonicalize_json;
///
/// let val = json!({"title": "x", "author": {"name": "a", "email": "e"}});
/// assert_eq!(
///     canonicalize_json(&val),
///     r#"{"author":{"email":"e","name":"a"},"title":"x"}"#
/// );
/// ```
#[must_use]
pub fn canonicalize_json(value: &Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

/// Serialize any value into its canonical JSON form.
///
/// # Panics
///
/// Panics if `value`'s `Serialize` impl fails. Every type hashed by this
/// crate is a plain data struct with string keys, for which serialization
/// to a `Value` cannot fail.
#[must_use]
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> String {
    let value = serde_json::to_value(value).expect("in-memory value serialization cannot fail");
    canonicalize_json(&value)
}

fn write_canonical(value: &Value, buf: &mut String) {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => push_escaped(s, buf),
        Value::Array(arr) => {
            buf.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(item, buf);
            }
            buf.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            buf.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                push_escaped(key, buf);
                buf.push(':');
                if let Some(val) = map.get(*key) {
                    write_canonical(val, buf);
                }
            }
            buf.push('}');
        }
    }
}

fn push_escaped(s: &str, buf: &mut String) {
    buf.push_str(&serde_json::to_string(s).expect("string serialization cannot fail"));
}
