//! Answer payload extraction and formatting.
//!
//! Extraction is a recursive descent over the parsed event body that
//! collects every value stored under a named field, at any depth, in
//! depth-first left-to-right order. Sequences found under the field are
//! flattened into the output.

use serde_json::Value;

use harvest_types::SENTINEL;

/// Field names probed, in order, when stringifying a structured fragment.
const FRAGMENT_TEXT_FIELDS: [&str; 3] = ["query", "q", "text"];

/// Collect every value stored under `field` anywhere in `body`.
///
/// A matched value is not searched further. `null` values under the field
/// carry nothing and are skipped.
pub fn collect_field(body: &Value, field: &str) -> Vec<Value> {
    let mut out = Vec::new();
    walk(body, field, &mut out);
    out
}

fn walk(value: &Value, field: &str, out: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == field {
                    match child {
                        Value::Array(items) => out.extend(items.iter().cloned()),
                        Value::Null => {}
                        other => out.push(other.clone()),
                    }
                } else {
                    walk(child, field, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, field, out);
            }
        }
        _ => {}
    }
}

/// String form of one answer fragment.
pub fn fragment_text(fragment: &Value) -> String {
    match fragment {
        Value::String(s) => s.clone(),
        Value::Object(map) => FRAGMENT_TEXT_FIELDS
            .iter()
            .find_map(|name| map.get(*name))
            .map(fragment_text)
            .unwrap_or_else(|| fragment.to_string()),
        other => other.to_string(),
    }
}

/// Format extracted fragments into the value recorded for a job.
///
/// No fragments yields the sentinel; otherwise the fragments' string forms
/// are joined with commas in their original order.
pub fn format_fragments(fragments: &[Value]) -> String {
    if fragments.is_empty() {
        return SENTINEL.to_string();
    }
    fragments
        .iter()
        .map(fragment_text)
        .collect::<Vec<_>>()
        .join(",")
}
