//! # Form Encoding
//!
//! Stripe takes `application/x-www-form-urlencoded` bodies with bracketed
//! keys. Cart items arrive as arbitrary JSON, so they are flattened here:
//! `{"price_data": {"currency": "usd"}}` under `line_items[0]` becomes
//! `line_items[0][price_data][currency]=usd`.

use serde_json::Value;

pub type FormParams = Vec<(String, String)>;

/// Flatten `value` under `prefix` into `out`. `null` leaves are skipped.
pub fn flatten_json(prefix: &str, value: &Value, out: &mut FormParams) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_json(&format!("{}[{}]", prefix, i), item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                flatten_json(&format!("{}[{}]", prefix, key), item, out);
            }
        }
    }
}

/// Push `name[0]=a`, `name[1]=b`, ...
pub fn push_list(name: &str, values: &[String], out: &mut FormParams) {
    for (i, value) in values.iter().enumerate() {
        out.push((format!("{}[{}]", name, i), value.clone()));
    }
}
