//! Shared utility functions for JSON payloads and common operations.
//!
//! ## JSON Extraction Helpers
//!
//! Agent outputs are loosely-shaped `serde_json::Value`s. These helpers keep
//! the extraction code in parsers and the pipeline short:
//! - `json_string`, `json_string_or` - Extract strings
//! - `json_string_array` - Extract string arrays
//! - `json_array_len` - Count list entries

use serde_json::Value;
use std::fmt::Display;

// =============================================================================
// JSON Value Extraction Helpers
// =============================================================================

/// Extract string from JSON value by key.
#[inline]
pub fn json_string(value: &Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(String::from)
}

/// Extract string with default value.
#[inline]
pub fn json_string_or(value: &Value, key: &str, default: &str) -> String {
    json_string(value, key).unwrap_or_else(|| default.to_string())
}

/// Extract string array from JSON value by key.
#[inline]
pub fn json_string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Length of the array at `key`, 0 when absent or not an array.
#[inline]
pub fn json_array_len(value: &Value, key: &str) -> usize {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0)
}

/// Render a value for inclusion in a prompt: strings verbatim, everything else pretty JSON.
pub fn json_for_prompt(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

// =============================================================================
// String Utilities
// =============================================================================

/// Truncate to at most `max_chars` characters (char-boundary safe).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// =============================================================================
// Error Logging Helpers
// =============================================================================

/// Convert a Result to Option, logging failures at debug level.
pub fn log_filter_error<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("{}: {}", context, e);
            None
        }
    }
}

/// Like log_filter_error but logs at warn level for more important operations.
pub fn log_filter_warn<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_helpers() {
        let v = json!({"name": "x", "tags": ["a", 1, "b"], "files": [{}, {}]});
        assert_eq!(json_string(&v, "name").as_deref(), Some("x"));
        assert_eq!(json_string_or(&v, "missing", "d"), "d");
        assert_eq!(json_string_array(&v, "tags"), vec!["a", "b"]);
        assert_eq!(json_array_len(&v, "files"), 2);
        assert_eq!(json_array_len(&v, "name"), 0);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_json_for_prompt() {
        assert_eq!(json_for_prompt(&json!("plain")), "plain");
        assert!(json_for_prompt(&json!({"a": 1})).contains("\"a\": 1"));
    }

    #[test]
    fn test_log_filter() {
        let ok: Result<i32, String> = Ok(1);
        let err: Result<i32, String> = Err("boom".into());
        assert_eq!(log_filter_warn(ok, "ctx"), Some(1));
        assert_eq!(log_filter_error(err, "ctx"), None);
    }
}
