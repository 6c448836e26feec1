//! Helpers for picking fields out of loosely-shaped upstream JSON.

use regex::Regex;
use serde_json::Value;

use super::error::StrategyError;

/// Depth-first search for the first object member named `key`.
pub(crate) fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|child| find_key(child, key))),
        Value::Array(items) => items.iter().find_map(|child| find_key(child, key)),
        _ => None,
    }
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Parses the JSON captured by group 1 of `pattern` inside an HTML page.
pub(crate) fn embedded_json(html: &str, pattern: &Regex, what: &str) -> Result<Value, StrategyError> {
    let raw = pattern
        .captures(html)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| StrategyError::payload(format!("{what} not found in page")))?;
    Ok(serde_json::from_str(raw.as_str().trim())?)
}

/// Decodes the body of a JSON string literal scraped out of a page (`\u002F`, `\"`).
pub(crate) fn unescape_json_string(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}

/// Non-`ok` codes are explicit upstream errors; a missing code is a payload error.
pub(crate) fn check_code(
    body: &Value,
    code_field: &str,
    message_field: &str,
    ok: i64,
) -> Result<(), StrategyError> {
    match body.get(code_field).and_then(Value::as_i64) {
        Some(code) if code == ok => Ok(()),
        Some(code) => Err(StrategyError::Api {
            code,
            message: body
                .get(message_field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Err(StrategyError::payload(format!("response has no {code_field}"))),
    }
}
