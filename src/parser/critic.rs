//! Critic verdict and integration package shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::decode_json;
use crate::types::{ValidationError, ValidationErrorKind, json_string_array};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticStatus {
    Approved,
    ChangesRequested,
    Rejected,
}

impl CriticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for CriticStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "changes_requested" => Ok(Self::ChangesRequested),
            "rejected" => Ok(Self::Rejected),
            other => Err(ValidationError::new(
                ValidationErrorKind::Range,
                format!(
                    "Unknown critic status '{}'. Expected approved, changes_requested or rejected",
                    other
                ),
            )
            .with_field("status")),
        }
    }
}

impl std::fmt::Display for CriticStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed critic review
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticVerdict {
    pub status: CriticStatus,
    pub feedback: String,
}

/// Unlike the stage parsers there is no fallback: an unreadable verdict is a
/// review error and the caller decides what that means.
pub fn parse_critic_verdict(raw: &Value) -> Result<CriticVerdict, ValidationError> {
    let decoded;
    let value = match raw {
        Value::String(text) => {
            decoded = decode_json(text).ok_or_else(|| {
                ValidationError::new(ValidationErrorKind::Schema, "Critic output is not valid JSON")
            })?;
            &decoded
        }
        other => other,
    };

    if !value.is_object() {
        return Err(ValidationError::new(
            ValidationErrorKind::Schema,
            "Critic output must be a dictionary",
        ));
    }

    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ValidationError::missing_field("status", "Critic output must contain 'status'")
        })?
        .parse::<CriticStatus>()?;

    // Prefer free-text feedback; fall back to the listed issues
    let feedback = match value.get("feedback").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => json_string_array(value, "issues").join("; "),
    };

    Ok(CriticVerdict { status, feedback })
}

/// Integration packages must list at least one file, each with path and content.
pub fn validate_package(package: &Value) -> Result<(), ValidationError> {
    let decoded;
    let package = match package {
        Value::String(text) => {
            decoded = decode_json(text).ok_or_else(|| {
                ValidationError::new(ValidationErrorKind::Schema, "Package is not valid JSON")
            })?;
            &decoded
        }
        other => other,
    };

    if !package.is_object() {
        return Err(ValidationError::new(
            ValidationErrorKind::Schema,
            "Package must be a dictionary",
        ));
    }

    let files = package
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ValidationError::missing_field("files", "Package must contain a 'files' list")
        })?;

    if files.is_empty() {
        return Err(ValidationError::new(
            ValidationErrorKind::Range,
            "Package must contain at least one file",
        ));
    }

    for (i, file) in files.iter().enumerate() {
        if file.get("path").is_none() {
            return Err(ValidationError::missing_field(
                "path",
                format!("File {} missing 'path'", i),
            ));
        }
        if file.get("content").is_none() {
            return Err(ValidationError::missing_field(
                "content",
                format!("File {} missing 'content'", i),
            ));
        }
    }

    Ok(())
}
