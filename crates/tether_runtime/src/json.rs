//! Rendering of host-native values as JSON

use serde_json::{json, Value};
use tether_script::Native;

/// Converts a native value tree to JSON.
///
/// Lossy where JSON has no equivalent: big integers become decimal strings,
/// dates become RFC 3339 strings, non-finite floats and opaque values become
/// `null`.
pub fn to_json(native: &Native) -> Value {
    match native {
        Native::Null | Native::Opaque => Value::Null,
        Native::Bool(b) => Value::Bool(*b),
        Native::Int(i) => json!(i),
        Native::Float(f) => float(*f),
        Native::BigInt(big) => Value::String(big.to_string()),
        Native::String(s) => Value::String(s.clone()),
        Native::Array(items) | Native::Set(items) => {
            Value::Array(items.iter().map(to_json).collect())
        }
        Native::Bytes(bytes) => json!(bytes),
        Native::Int8Array(v) => json!(v),
        Native::Int16Array(v) => json!(v),
        Native::Int32Array(v) => json!(v),
        Native::Uint8Array(v) => json!(v),
        Native::Uint16Array(v) => json!(v),
        Native::Uint32Array(v) => json!(v),
        Native::Float32Array(v) => Value::Array(v.iter().map(|f| float(f64::from(*f))).collect()),
        Native::Float64Array(v) => Value::Array(v.iter().map(|f| float(*f)).collect()),
        Native::BigInt64Array(v) => json!(v),
        Native::BigUint64Array(v) => json!(v),
        Native::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), to_json(value)))
                .collect(),
        ),
        Native::Date(date) => Value::String(date.to_rfc3339()),
        Native::Function(_) => Value::String("[host function]".to_string()),
    }
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Formats one `print` argument: strings verbatim, everything else as JSON.
pub fn display(native: &Native) -> String {
    match native {
        Native::String(s) => s.clone(),
        other => to_json(other).to_string(),
    }
}
