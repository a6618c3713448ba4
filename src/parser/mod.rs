//! Agent Output Parsing and Validation
//!
//! One `parse` / `validate` pair per stage output shape:
//!
//! - [`spec`]: planner specification
//! - [`code`]: coder file list
//! - [`tester`]: tester review and generated tests
//! - [`critic`]: critic verdict and integration package
//!
//! `parse` never fails. A mapping passes through untouched; a string is
//! decoded as JSON (after dropping one surrounding Markdown fence), and
//! anything undecodable becomes a fallback structure that keeps the raw text
//! and carries `"unparsed": true`.
//!
//! `validate` returns the first problem found as a
//! [`ValidationError`](crate::types::ValidationError).
//! Both are pure and synchronous.

pub mod code;
pub mod critic;
pub mod spec;
pub mod tester;

pub use code::{
    CodeFile, CodeStats, code_files, count_code_stats, file_tree, parse_code_output,
    validate_code_output,
};
pub use critic::{CriticStatus, CriticVerdict, parse_critic_verdict, validate_package};
pub use spec::{Complexity, KeyInfo, extract_key_info, parse_specification, validate_specification};
pub use tester::{
    IssueCounts, Severity, TestFile, count_issues_by_severity, extract_critical_issues,
    generate_test_summary, has_blocking_issues, parse_test_output, test_files,
    validate_test_output,
};

use serde_json::Value;

/// Marker key set on fallback structures
pub const UNPARSED_KEY: &str = "unparsed";

/// Trim and drop one surrounding ```` ``` ```` / ```` ```json ```` fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. "json") on the opening line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Strict JSON decode of an agent's text output.
pub fn decode_json(raw: &str) -> Option<Value> {
    serde_json::from_str(strip_code_fence(raw)).ok()
}

/// Whether a parsed value is a fallback structure
pub fn is_unparsed(value: &Value) -> bool {
    value
        .get(UNPARSED_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Shared parse skeleton: objects pass through, strings are decoded,
/// everything else goes to `fallback` as text.
fn parse_with(raw: &Value, fallback: impl FnOnce(&str) -> Value) -> Value {
    match raw {
        Value::Object(_) => raw.clone(),
        Value::String(text) => decode_json(text).unwrap_or_else(|| fallback(text)),
        other => fallback(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```{}```"), "{}");
    }

    #[test]
    fn test_unclosed_fence_left_alone() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "```json\n{\"a\":1}");
    }

    #[test]
    fn test_decode_json_is_strict() {
        assert_eq!(decode_json("{\"a\": 1}"), Some(json!({"a": 1})));
        assert_eq!(decode_json("{'a': 1}"), None);
        assert_eq!(decode_json("Here you go: {\"a\": 1}"), None);
    }

    #[test]
    fn test_parse_with_passes_objects_through() {
        let object = json!({"x": true});
        assert_eq!(parse_with(&object, |_| json!(null)), object);
        assert_eq!(
            parse_with(&json!(42), |text| json!({"raw": text})),
            json!({"raw": "42"})
        );
    }
}
