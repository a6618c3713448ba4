//! Coder output shape: `{files: [{path, content, description?}], ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::{UNPARSED_KEY, parse_with};
use crate::types::{ValidationError, ValidationErrorKind};

/// One generated source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFile {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub description: String,
}

/// Unparseable text becomes a single `output.txt` file so nothing is lost.
pub fn parse_code_output(raw: &Value) -> Value {
    parse_with(raw, |text| {
        json!({
            "files": [{
                "path": "output.txt",
                "content": text,
                "description": "Generated content",
            }],
            "setup_instructions": "Review the generated content",
            "notes": "Output was not in expected JSON format",
            UNPARSED_KEY: true,
        })
    })
}

pub fn validate_code_output(output: &Value) -> Result<(), ValidationError> {
    let Some(map) = output.as_object() else {
        return Err(ValidationError::new(
            ValidationErrorKind::Schema,
            "Output must be a dictionary",
        ));
    };

    let Some(files) = map.get("files") else {
        return Err(ValidationError::missing_field(
            "files",
            "Output must contain 'files' key",
        ));
    };

    let Some(files) = files.as_array() else {
        return Err(
            ValidationError::new(ValidationErrorKind::Schema, "'files' must be a list")
                .with_field("files"),
        );
    };

    for (i, file) in files.iter().enumerate() {
        let Some(file) = file.as_object() else {
            return Err(ValidationError::new(
                ValidationErrorKind::Schema,
                format!("File {} must be a dictionary", i),
            ));
        };
        if !file.contains_key("path") {
            return Err(ValidationError::missing_field(
                "path",
                format!("File {} missing 'path' field", i),
            ));
        }
        if !file.contains_key("content") {
            return Err(ValidationError::missing_field(
                "content",
                format!("File {} missing 'content' field", i),
            ));
        }
    }

    Ok(())
}

/// Typed view of a validated `files` list. Non-string paths/contents are
/// rendered as JSON text.
pub fn code_files(output: &Value) -> Vec<CodeFile> {
    output
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .map(|file| CodeFile {
                    path: text_field(file, "path", "unknown"),
                    content: text_field(file, "content", ""),
                    description: text_field(file, "description", ""),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn text_field(value: &Value, key: &str, default: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeStats {
    pub total_files: usize,
    pub total_lines: usize,
    pub total_chars: usize,
    /// Extension -> file count; "unknown" for extensionless paths
    pub file_types: BTreeMap<String, usize>,
}

pub fn count_code_stats(files: &[CodeFile]) -> CodeStats {
    let mut stats = CodeStats {
        total_files: files.len(),
        ..CodeStats::default()
    };

    for file in files {
        stats.total_chars += file.content.chars().count();
        stats.total_lines += file.content.matches('\n').count();

        let ext = file
            .path
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("unknown");
        *stats.file_types.entry(ext.to_string()).or_insert(0) += 1;
    }

    stats
}

/// Nested directory tree built from flat paths. Leaves carry
/// `{type: "file", size, description}`.
pub fn file_tree(files: &[CodeFile]) -> Value {
    let mut root = Map::new();

    'files: for file in files {
        let parts: Vec<&str> = file.path.split('/').collect();
        let Some((leaf, dirs)) = parts.split_last() else {
            continue;
        };

        let mut current = &mut root;
        for dir in dirs {
            let entry = current
                .entry(dir.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                // a file and a directory share this name; the directory wins
                *entry = Value::Object(Map::new());
            }
            let Some(next) = entry.as_object_mut() else {
                continue 'files;
            };
            current = next;
        }

        current.insert(
            leaf.to_string(),
            json!({
                "type": "file",
                "size": file.content.chars().count(),
                "description": file.description,
            }),
        );
    }

    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::is_unparsed;
    use proptest::prelude::*;

    fn code_file() -> impl Strategy<Value = CodeFile> {
        (
            "[a-z_]{1,10}(/[a-z_]{1,10}){0,2}\\.[a-z]{1,4}",
            any::<String>(),
            ".{0,40}",
        )
            .prop_map(|(path, content, description)| CodeFile {
                path,
                content,
                description,
            })
    }

    proptest! {
        #[test]
        fn prop_serialized_file_list_parses_back(
            files in prop::collection::vec(code_file(), 0..6),
            fenced in any::<bool>(),
        ) {
            let output = json!({"files": &files});
            let text = serde_json::to_string(&output).unwrap();
            let raw = if fenced { format!("```json\n{}\n```", text) } else { text };

            let parsed = parse_code_output(&Value::String(raw));
            prop_assert!(!is_unparsed(&parsed));
            prop_assert!(validate_code_output(&parsed).is_ok());
            prop_assert_eq!(&parsed, &output);
            prop_assert_eq!(code_files(&parsed), files);
        }
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = json!("```json\n{\"files\": [{\"path\": \"a.py\", \"content\": \"x\"}]}\n```");
        let parsed = parse_code_output(&raw);
        assert!(validate_code_output(&parsed).is_ok());
        assert_eq!(code_files(&parsed)[0].path, "a.py");
    }

    #[test]
    fn test_parse_fallback_is_single_file() {
        let parsed = parse_code_output(&json!("def main(): pass"));
        assert!(is_unparsed(&parsed));
        assert!(validate_code_output(&parsed).is_ok());
        let files = code_files(&parsed);
        assert_eq!(files[0].path, "output.txt");
        assert_eq!(files[0].content, "def main(): pass");
    }

    #[test]
    fn test_validate_first_error_wins() {
        let err = validate_code_output(&json!({})).unwrap_err();
        assert_eq!(err.message, "Output must contain 'files' key");

        let err = validate_code_output(&json!({"files": {}})).unwrap_err();
        assert_eq!(err.message, "'files' must be a list");

        let err = validate_code_output(&json!({"files": ["a.py"]})).unwrap_err();
        assert_eq!(err.message, "File 0 must be a dictionary");

        let err = validate_code_output(&json!({
            "files": [{"path": "a", "content": ""}, {"content": "x"}, {"path": "c"}]
        }))
        .unwrap_err();
        assert_eq!(err.message, "File 1 missing 'path' field");

        let err = validate_code_output(&json!({"files": [{"path": "c"}]})).unwrap_err();
        assert_eq!(err.message, "File 0 missing 'content' field");
    }

    #[test]
    fn test_count_code_stats() {
        let files = vec![
            CodeFile {
                path: "src/main.py".into(),
                content: "a\nb\n".into(),
                description: String::new(),
            },
            CodeFile {
                path: "Makefile".into(),
                content: "all:".into(),
                description: String::new(),
            },
        ];
        let stats = count_code_stats(&files);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_lines, 2);
        assert_eq!(stats.total_chars, 8);
        assert_eq!(stats.file_types["py"], 1);
        assert_eq!(stats.file_types["unknown"], 1);
    }

    #[test]
    fn test_file_tree() {
        let files = vec![
            CodeFile {
                path: "src/app/main.py".into(),
                content: "abc".into(),
                description: "entry".into(),
            },
            CodeFile {
                path: "README.md".into(),
                content: String::new(),
                description: String::new(),
            },
        ];
        let tree = file_tree(&files);
        assert_eq!(tree["src"]["app"]["main.py"]["size"], 3);
        assert_eq!(tree["src"]["app"]["main.py"]["description"], "entry");
        assert_eq!(tree["README.md"]["type"], "file");
    }
}
