//! Planner specification shape.

use serde::Serialize;
use serde_json::{Value, json};

use super::{UNPARSED_KEY, parse_with};
use crate::types::{ValidationError, ValidationErrorKind, json_array_len, truncate_chars};

/// Top-level keys every specification must carry
pub const REQUIRED_FIELDS: &[&str] = &[
    "purpose",
    "components",
    "technology",
    "file_structure",
    "dependencies",
];

pub fn parse_specification(raw: &Value) -> Value {
    parse_with(raw, |text| {
        json!({
            "raw_output": text,
            "error": "Unable to parse planner output",
            UNPARSED_KEY: true,
        })
    })
}

/// Checks that every required key is present; reports all missing keys at once.
pub fn validate_specification(spec: &Value) -> Result<(), ValidationError> {
    let Some(map) = spec.as_object() else {
        return Err(ValidationError::new(
            ValidationErrorKind::Schema,
            "Specification must be a dictionary",
        ));
    };

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !map.contains_key(*field))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(
            ValidationErrorKind::MissingField,
            format!("Missing required fields: {}", missing.join(", ")),
        ))
    }
}

// =============================================================================
// Key Info
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// Condensed view of a specification for status output
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub purpose: String,
    pub num_components: usize,
    pub technology: String,
    pub complexity: Complexity,
}

pub fn extract_key_info(spec: &Value) -> KeyInfo {
    let purpose = spec.get("purpose").and_then(Value::as_str).unwrap_or("");
    let technology = spec
        .get("technology")
        .and_then(|t| t.get("language"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    KeyInfo {
        purpose: truncate_chars(purpose, 200),
        num_components: json_array_len(spec, "components"),
        technology: technology.to_string(),
        complexity: estimate_complexity(spec),
    }
}

fn estimate_complexity(spec: &Value) -> Complexity {
    let components = json_array_len(spec, "components");
    let dependencies = json_array_len(spec, "dependencies");

    if components <= 3 && dependencies <= 5 {
        Complexity::Simple
    } else if components <= 8 && dependencies <= 15 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::is_unparsed;

    fn full_spec() -> Value {
        json!({
            "purpose": "Task tracker",
            "components": ["api", "db"],
            "technology": {"language": "python"},
            "file_structure": {},
            "dependencies": ["fastapi"]
        })
    }

    #[test]
    fn test_parse_json_string() {
        let raw = Value::String(full_spec().to_string());
        let parsed = parse_specification(&raw);
        assert!(validate_specification(&parsed).is_ok());
    }

    #[test]
    fn test_parse_fallback_keeps_raw() {
        let parsed = parse_specification(&json!("Sure! Here is the plan..."));
        assert!(is_unparsed(&parsed));
        assert_eq!(parsed["raw_output"], "Sure! Here is the plan...");
        assert_eq!(parsed["error"], "Unable to parse planner output");
    }

    #[test]
    fn test_validate_lists_all_missing_fields() {
        let err = validate_specification(&json!({"purpose": "x", "components": []})).unwrap_err();
        assert_eq!(
            err.message,
            "Missing required fields: technology, file_structure, dependencies"
        );
    }

    #[test]
    fn test_validate_rejects_non_mapping() {
        let parsed = parse_specification(&json!("[1, 2]"));
        let err = validate_specification(&parsed).unwrap_err();
        assert_eq!(err.message, "Specification must be a dictionary");
    }

    #[test]
    fn test_extract_key_info() {
        let info = extract_key_info(&full_spec());
        assert_eq!(info.technology, "python");
        assert_eq!(info.num_components, 2);
        assert_eq!(info.complexity, Complexity::Simple);

        let big = json!({"components": vec![0; 9], "dependencies": []});
        assert_eq!(extract_key_info(&big).complexity, Complexity::Complex);
        let mid = json!({"components": vec![0; 4], "dependencies": vec![0; 10]});
        assert_eq!(extract_key_info(&mid).complexity, Complexity::Moderate);
    }
}
