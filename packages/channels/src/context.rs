//! Context payload checks.
//!
//! A context is a JSON object identified by a non-empty string `type`.

use interop_transport::{Error, Result};
use serde_json::Value;

/// Check a context's shape and return its type.
///
/// # Errors
///
/// * `Validation` - not an object, or no non-empty string `type`.
pub fn validate_context(context: &Value) -> Result<&str> {
    let Value::Object(map) = context else {
        return Err(Error::validation("context must be an object"));
    };
    match map.get("type") {
        Some(Value::String(context_type)) if !context_type.is_empty() => Ok(context_type),
        _ => Err(Error::validation(
            "context must have a non-empty string 'type'",
        )),
    }
}

/// Check an optional context-type filter.
pub fn validate_context_type(context_type: Option<&str>) -> Result<()> {
    match context_type {
        Some("") => Err(Error::validation("context type must not be empty")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_typed_object() {
        let context = json!({"type": "fdc3.instrument", "id": {"ticker": "AAPL"}});
        assert_eq!(validate_context(&context).unwrap(), "fdc3.instrument");
    }

    #[test]
    fn rejects_bad_shapes() {
        for bad in [
            json!(null),
            json!("fdc3.instrument"),
            json!([{"type": "x"}]),
            json!({"id": 1}),
            json!({"type": 7}),
            json!({"type": ""}),
        ] {
            assert!(
                matches!(validate_context(&bad), Err(Error::Validation(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn context_type_filter() {
        assert!(validate_context_type(None).is_ok());
        assert!(validate_context_type(Some("t")).is_ok());
        assert!(validate_context_type(Some("")).is_err());
    }
}
