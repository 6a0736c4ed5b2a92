//! Argument validation against a tool's input schema
//!
//! Covers the subset of JSON Schema the built-in tools declare: a top-level
//! `object` with `required`, typed `properties`, `enum` and
//! `additionalProperties: false`. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Check `args` against `schema`, returning a description of the first problem
pub fn validate(schema: &Value, args: &Map<String, Value>) -> Result<(), String> {
    if let Some(kind) = schema.get("type").and_then(Value::as_str) {
        if kind != "object" {
            return Err(format!("schema type '{kind}' is not supported for arguments"));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(key) {
                return Err(format!("missing required field '{key}'"));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in args {
        let Some(prop) = properties.and_then(|p| p.get(key)) else {
            if closed {
                return Err(format!("unexpected field '{key}'"));
            }
            continue;
        };
        check_value(key, prop, value)?;
    }

    Ok(())
}

fn check_value(key: &str, prop: &Value, value: &Value) -> Result<(), String> {
    if let Some(expected) = prop.get("type").and_then(Value::as_str) {
        if !matches_type(expected, value) {
            return Err(format!(
                "field '{key}' must be of type {expected}, got {}",
                type_name(value)
            ));
        }
    }

    if let Some(options) = prop.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(format!("field '{key}' must be one of {}", Value::Array(options.clone())));
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
