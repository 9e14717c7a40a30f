//! Argument validation against a tool's declared parameter schema.
//!
//! Covers the subset of JSON Schema the tool catalog actually uses:
//! `type: object` at the top level, per-property `type`, `enum`, and the
//! `required` list. A failure here yields `INVALID_ARGUMENTS` and the
//! handler is never invoked.

use serde_json::Value;

/// Validate `args` against `schema`. Returns the first violation as a
/// human-readable reason.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("missing required argument '{name}'"));
            }
        }
    }

    let Some(properties) = properties else {
        return Ok(());
    };

    for (name, value) in obj {
        let Some(prop) = properties.get(name) else {
            return Err(format!("unknown argument '{name}'"));
        };
        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(format!(
                    "argument '{name}' must be of type {expected}"
                ));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("argument '{name}' is not one of the allowed values"));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown type names don't fail closed here; the schema author
        // opted out of validation for this property.
        _ => true,
    }
}
