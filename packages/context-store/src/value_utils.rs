//! Helpers for document values.

use serde_json::{Map, Value};

use interop_transport::{Error, Result};

/// Merge the top-level keys of `partial` into `current`.
///
/// Keys present in `partial` overwrite (last write wins); keys absent from
/// it are kept. Nested objects are replaced, not merged. A missing or
/// non-object `current` is treated as an empty object.
///
/// # Errors
///
/// Returns a validation error if `partial` is not an object.
pub fn merge_top_level(current: Option<&Value>, partial: &Value) -> Result<Value> {
    let Value::Object(partial) = partial else {
        return Err(Error::validation(format!(
            "update expects an object, got {}",
            type_name(partial)
        )));
    };

    let mut merged = as_object(current);
    for (key, value) in partial {
        merged.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(merged))
}

/// Clone `value` as an object map, or an empty map if it is not one.
pub fn as_object(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// The string held in a top-level slot, ignoring nulls.
pub fn slot_holder<'a>(value: Option<&'a Value>, slot: &str) -> Option<&'a str> {
    value.and_then(|v| v.get(slot)).and_then(Value::as_str)
}

/// Human-readable JSON type name, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
