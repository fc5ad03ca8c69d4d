// ABOUTME: Conversion between SQLite values and JSON row values
// ABOUTME: Encodes blobs as base64 and stores nested JSON as text

use base64::Engine;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

/// Convert an SQLite column value to JSON
///
/// Maps SQLite storage classes to JSON types:
/// - INTEGER → number
/// - REAL → number (non-finite values become strings)
/// - TEXT → string
/// - BLOB → base64 string
/// - NULL → null
pub fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

/// Convert a JSON value to an SQLite parameter
///
/// Booleans become 0/1, integers that overflow i64 become REAL, arrays and
/// objects are stored as their JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}
