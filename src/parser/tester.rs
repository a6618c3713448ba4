//! Tester output shape: `{review: {issues: [...], ...}, tests: [...]}`.
//!
//! Issues are graded `critical | high | medium | low`; critical or high
//! issues block a run from completing.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;

use super::code::text_field;
use super::{UNPARSED_KEY, parse_with};
use crate::types::{ValidationError, ValidationErrorKind};

// =============================================================================
// Severity
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Severity of one issue entry; a missing severity counts as low.
    /// `None` when the value is present but unrecognized.
    fn of_issue(issue: &Value) -> Option<Self> {
        match issue.get("severity") {
            None | Some(Value::Null) => Some(Self::Low),
            Some(Value::String(s)) => s.parse().ok(),
            Some(_) => None,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Parse / Validate
// =============================================================================

pub fn parse_test_output(raw: &Value) -> Value {
    parse_with(raw, |text| {
        json!({
            "review": {
                "matches_spec": false,
                "overall_quality": "unknown",
                "issues": [],
            },
            "tests": [],
            "error": "Unable to parse tester output",
            "raw_output": text,
            UNPARSED_KEY: true,
        })
    })
}

pub fn validate_test_output(output: &Value) -> Result<(), ValidationError> {
    let Some(map) = output.as_object() else {
        return Err(ValidationError::new(
            ValidationErrorKind::Schema,
            "Output must be a dictionary",
        ));
    };

    let Some(review) = map.get("review") else {
        return Err(ValidationError::missing_field(
            "review",
            "Output must contain 'review' key",
        ));
    };
    let Some(tests) = map.get("tests") else {
        return Err(ValidationError::missing_field(
            "tests",
            "Output must contain 'tests' key",
        ));
    };

    if !review.is_object() {
        return Err(schema_error("review", "'review' must be a dictionary"));
    }
    if !tests.is_array() {
        return Err(schema_error("tests", "'tests' must be a list"));
    }

    // A clean review may omit `issues`
    let issues = match review.get("issues") {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Array(issues)) => issues,
        Some(_) => return Err(schema_error("review.issues", "'review.issues' must be a list")),
    };

    for (i, issue) in issues.iter().enumerate() {
        if !issue.is_object() {
            return Err(schema_error(
                "review.issues",
                format!("Issue {} must be a dictionary", i),
            ));
        }
        if Severity::of_issue(issue).is_none() {
            let shown = match issue.get("severity") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return Err(ValidationError::new(
                ValidationErrorKind::Range,
                format!("Issue {} has unknown severity '{}'", i, shown),
            )
            .with_field("severity"));
        }
    }

    Ok(())
}

fn schema_error(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::new(ValidationErrorKind::Schema, message).with_field(field)
}

// =============================================================================
// Review Inspection
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IssueCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl IssueCounts {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }

    pub fn blocking(&self) -> usize {
        self.critical + self.high
    }
}

fn issues(review: &Value) -> &[Value] {
    review
        .get("issues")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Unrecognized severities are not counted.
pub fn count_issues_by_severity(review: &Value) -> IssueCounts {
    let mut counts = IssueCounts::default();
    for severity in issues(review).iter().filter_map(Severity::of_issue) {
        match severity {
            Severity::Critical => counts.critical += 1,
            Severity::High => counts.high += 1,
            Severity::Medium => counts.medium += 1,
            Severity::Low => counts.low += 1,
        }
    }
    counts
}

pub fn has_blocking_issues(review: &Value) -> bool {
    count_issues_by_severity(review).blocking() > 0
}

/// Critical and high issues, in review order
pub fn extract_critical_issues(review: &Value) -> Vec<Value> {
    issues(review)
        .iter()
        .filter(|issue| Severity::of_issue(issue).is_some_and(|s| s.is_blocking()))
        .cloned()
        .collect()
}

pub fn generate_test_summary(output: &Value) -> String {
    let review = output.get("review").unwrap_or(&Value::Null);
    let counts = count_issues_by_severity(review);
    let quality = review
        .get("overall_quality")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let matches_spec = review
        .get("matches_spec")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let coverage = output
        .get("test_coverage")
        .and_then(|c| c.get("estimated_coverage"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let tests = output
        .get("tests")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    [
        format!("Code Quality: {}", quality.to_uppercase()),
        format!(
            "Matches Specification: {}",
            if matches_spec { "YES" } else { "NO" }
        ),
        format!("Issues Found: {} total", counts.total()),
        format!("  - Critical: {}", counts.critical),
        format!("  - High: {}", counts.high),
        format!("  - Medium: {}", counts.medium),
        format!("  - Low: {}", counts.low),
        format!("Test Files Generated: {}", tests),
        format!("Estimated Coverage: {}", coverage),
    ]
    .join("\n")
}

// =============================================================================
// Test Files
// =============================================================================

/// One generated test file; agents name it `file` (or `path`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFile {
    pub file: String,
    pub content: String,
    pub description: String,
}

pub fn test_files(output: &Value) -> Vec<TestFile> {
    output
        .get("tests")
        .and_then(Value::as_array)
        .map(|tests| {
            tests
                .iter()
                .map(|test| {
                    let name_key = if test.get("file").is_some() { "file" } else { "path" };
                    TestFile {
                        file: text_field(test, name_key, "unknown"),
                        content: text_field(test, "content", ""),
                        description: text_field(test, "description", ""),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::is_unparsed;

    fn review_with(severities: &[&str]) -> Value {
        let issues: Vec<Value> = severities
            .iter()
            .map(|s| json!({"severity": s, "description": "x"}))
            .collect();
        json!({"issues": issues})
    }

    #[test]
    fn test_blocking_detection() {
        assert!(!has_blocking_issues(&review_with(&["low", "medium"])));
        assert!(has_blocking_issues(&review_with(&["low", "high"])));
        assert!(has_blocking_issues(&review_with(&["critical"])));
        assert!(!has_blocking_issues(&json!({})));
    }

    #[test]
    fn test_missing_severity_counts_as_low() {
        let review = json!({"issues": [{"description": "no severity"}]});
        let counts = count_issues_by_severity(&review);
        assert_eq!(counts.low, 1);
        assert_eq!(counts.total(), 1);
    }

    #[test]
    fn test_extract_critical_issues_keeps_order() {
        let review = review_with(&["high", "low", "critical"]);
        let critical = extract_critical_issues(&review);
        assert_eq!(critical.len(), 2);
        assert_eq!(critical[0]["severity"], "high");
        assert_eq!(critical[1]["severity"], "critical");
    }

    #[test]
    fn test_validate_errors() {
        let cases = [
            (json!({"tests": []}), "Output must contain 'review' key"),
            (json!({"review": {}}), "Output must contain 'tests' key"),
            (json!({"review": [], "tests": []}), "'review' must be a dictionary"),
            (json!({"review": {}, "tests": {}}), "'tests' must be a list"),
            (
                json!({"review": {"issues": "none"}, "tests": []}),
                "'review.issues' must be a list",
            ),
            (
                json!({"review": {"issues": [{"severity": "blocker"}]}, "tests": []}),
                "Issue 0 has unknown severity 'blocker'",
            ),
        ];
        for (output, expected) in cases {
            assert_eq!(validate_test_output(&output).unwrap_err().message, expected);
        }
        assert!(validate_test_output(&json!({"review": {}, "tests": []})).is_ok());
    }

    #[test]
    fn test_parse_fallback_validates() {
        let parsed = parse_test_output(&json!("looks fine to me"));
        assert!(is_unparsed(&parsed));
        assert!(validate_test_output(&parsed).is_ok());
        assert!(!has_blocking_issues(&parsed["review"]));
        assert_eq!(parsed["raw_output"], "looks fine to me");
    }

    #[test]
    fn test_generate_test_summary() {
        let output = json!({
            "review": {"overall_quality": "good", "matches_spec": true,
                       "issues": [{"severity": "medium"}]},
            "tests": [{"file": "t.py", "content": ""}],
            "test_coverage": {"estimated_coverage": "80%"}
        });
        let summary = generate_test_summary(&output);
        assert!(summary.contains("Code Quality: GOOD"));
        assert!(summary.contains("Matches Specification: YES"));
        assert!(summary.contains("Issues Found: 1 total"));
        assert!(summary.contains("Test Files Generated: 1"));
        assert!(summary.contains("Estimated Coverage: 80%"));
    }

    #[test]
    fn test_test_files_accepts_file_or_path() {
        let output = json!({"tests": [
            {"file": "tests/test_a.py", "content": "a"},
            {"path": "tests/test_b.py", "content": "b"}
        ]});
        let files = test_files(&output);
        assert_eq!(files[0].file, "tests/test_a.py");
        assert_eq!(files[1].file, "tests/test_b.py");
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
        assert!(Severity::Critical > Severity::Low);
    }
}
