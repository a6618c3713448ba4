//! Prompt Quality Gate
//!
//! Lexical checks run before any agent is invoked:
//!
//! - `validate`: scores a prompt and lists hard issues, warnings and suggestions
//! - `enhance`: wraps a prompt in a fixed system-instruction block
//! - `extract_requirements`: pulls purpose, features, tech stack, constraints and scale
//!
//! Everything here is deterministic: identical input always yields identical output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::config::PromptConfig;
use crate::constants::prompt::{
    MAX_CONSTRAINTS, MAX_FEATURES, MAX_QUESTIONS, SPECIFIC_WORD_COUNT, penalty,
};
use crate::types::truncate_chars;

// =============================================================================
// Keyword Tables
// =============================================================================

const PURPOSE_KEYWORDS: &[&str] = &[
    "build",
    "create",
    "develop",
    "make",
    "implement",
    "want",
    "need",
    "require",
    "looking for",
];

const SPECIFICITY_KEYWORDS: &[&str] = &["example", "such as", "specifically", "exactly"];

const CONSTRAINT_KEYWORDS: &[&str] = &[
    "must",
    "should",
    "need to",
    "required",
    "constraint",
    "limitation",
    "cannot",
    "must not",
];

const SMALL_INDICATORS: &[&str] = &["simple", "small", "basic", "minimal", "quick", "prototype"];
const LARGE_INDICATORS: &[&str] = &[
    "large",
    "complex",
    "enterprise",
    "scalable",
    "production",
    "advanced",
];

/// Technology buckets, matched on word boundaries
static TECH_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("python", r"python|fastapi|django|flask|pydantic"),
        ("javascript", r"javascript|node(?:\.?js)?|react|vue|angular|next\.?js"),
        ("typescript", r"typescript|tsx?"),
        ("go", r"golang|(?:in|with|using)\s+go"),
        ("rust", r"rust"),
        ("java", r"java|spring(?:\s?boot)?"),
        ("database", r"postgres(?:ql)?|mysql|mongodb|redis|sqlite"),
        ("frontend", r"html|css|tailwind|bootstrap"),
        ("backend", r"apis?|rest(?:ful)?\s+api|restful|graphql|grpc"),
    ]
    .into_iter()
    .map(|(bucket, pattern)| {
        let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", pattern))
            .expect("technology pattern is a valid regex");
        (bucket, regex)
    })
    .collect()
});

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[.)]\s").expect("numbered item pattern is a valid regex"));

/// Start of a bullet or numbered list item within a line
static ITEM_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(?:[•\-*]|\d+[.)])\s+").expect("item marker pattern is a valid regex")
});

static DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d").expect("digit pattern is a valid regex"));

// =============================================================================
// Report Types
// =============================================================================

/// Outcome of `PromptQualityGate::validate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff `issues` is empty
    pub valid: bool,
    /// 0..=100
    pub score: u8,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Small,
    Medium,
    Large,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub purpose: Option<String>,
    pub features: Vec<String>,
    /// Sorted technology bucket names
    pub tech_stack: Vec<String>,
    pub constraints: Vec<String>,
    pub scale: Scale,
}

// =============================================================================
// Gate
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct PromptQualityGate {
    config: PromptConfig,
}

impl PromptQualityGate {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Score a prompt. Only `issues` invalidate; warnings and suggestions
    /// affect the score alone.
    pub fn validate(&self, prompt: &str) -> ValidationReport {
        let prompt = prompt.trim();
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();
        let mut warnings = Vec::new();
        let mut score: i32 = 100;

        let length = prompt.chars().count();
        if length < self.config.min_length {
            issues.push(format!(
                "Prompt too short ({} chars, minimum {})",
                length, self.config.min_length
            ));
            suggestions.push("Add more details about what you want to build".to_string());
            score -= penalty::TOO_SHORT;
        } else if length < self.config.recommended_length {
            warnings.push(format!(
                "Prompt is short ({} chars, recommended {}+)",
                length, self.config.recommended_length
            ));
            suggestions.push("Consider adding more details for better results".to_string());
            score -= penalty::SHORT;
        }

        if length > self.config.max_length {
            warnings.push(format!("Prompt is very long ({} chars)", length));
            suggestions.push("Consider breaking into multiple projects".to_string());
        }

        if !has_purpose(prompt) {
            issues.push("Purpose unclear".to_string());
            suggestions.push("Start with 'I want to build...' or 'I need...'".to_string());
            score -= penalty::NO_PURPOSE;
        }

        if !has_features(prompt) {
            issues.push("No features or functionality described".to_string());
            suggestions.push("List the key features you need".to_string());
            score -= penalty::NO_FEATURES;
        }

        if detect_tech_stack(prompt).is_empty() {
            suggestions
                .push("Consider mentioning preferred tech stack (e.g., Python, React)".to_string());
            score -= penalty::NO_TECH;
        }

        if !is_specific(prompt) {
            warnings.push("Prompt may be too vague".to_string());
            suggestions.push("Be more specific about requirements and constraints".to_string());
            score -= penalty::VAGUE;
        }

        let questions = prompt.matches('?').count();
        if questions > MAX_QUESTIONS {
            warnings.push(format!(
                "Contains {} questions - may indicate uncertainty",
                questions
            ));
            suggestions.push("Try to state requirements rather than ask questions".to_string());
        }

        ValidationReport {
            valid: issues.is_empty(),
            score: score.clamp(0, 100) as u8,
            issues,
            suggestions,
            warnings,
        }
    }

    /// Wrap the prompt in system guidance. `context` entries are rendered in
    /// key order; the prompt itself is included verbatim.
    pub fn enhance(&self, prompt: &str, context: Option<&BTreeMap<String, String>>) -> String {
        let requirements = self.extract_requirements(prompt);

        let mut parts = vec![
            "SYSTEM CONTEXT:".to_string(),
            "- Generate production-ready code".to_string(),
            "- Follow language best practices".to_string(),
            "- Include comprehensive error handling".to_string(),
            "- Add clear docstrings and comments".to_string(),
            "- Make code testable and maintainable".to_string(),
            "- Consider security implications".to_string(),
        ];

        if !requirements.tech_stack.is_empty() {
            parts.push(format!(
                "\nDETECTED TECHNOLOGIES: {}",
                requirements.tech_stack.join(", ")
            ));
        }

        parts.push(format!(
            "\nPROJECT SCALE: {}",
            requirements.scale.as_str().to_uppercase()
        ));
        match requirements.scale {
            Scale::Small => parts.push("- Focus on simplicity and quick delivery".to_string()),
            Scale::Large => {
                parts.push("- Focus on scalability and maintainability".to_string());
                parts.push("- Consider microservices architecture".to_string());
            }
            Scale::Medium => {}
        }

        if let Some(context) = context.filter(|c| !c.is_empty()) {
            parts.push("\nADDITIONAL CONTEXT:".to_string());
            for (key, value) in context {
                parts.push(format!("- {}: {}", key, value));
            }
        }

        parts.push(format!("\nUSER REQUIREMENTS:\n{}", prompt));
        parts.push(
            "\nPlease analyze these requirements and proceed with implementation.".to_string(),
        );

        parts.join("\n")
    }

    pub fn extract_requirements(&self, prompt: &str) -> Requirements {
        Requirements {
            purpose: extract_purpose(prompt),
            features: extract_features(prompt),
            tech_stack: detect_tech_stack(prompt),
            constraints: extract_constraints(prompt),
            scale: determine_scale(prompt),
        }
    }
}

// =============================================================================
// Lexical Helpers
// =============================================================================

fn sentences(prompt: &str) -> Vec<&str> {
    prompt
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

fn has_purpose(prompt: &str) -> bool {
    contains_any(prompt, PURPOSE_KEYWORDS)
}

/// More than two sentences, more than two bullet markers, or more than one
/// numbered item.
fn has_features(prompt: &str) -> bool {
    let bullets = prompt
        .chars()
        .filter(|c| matches!(c, '•' | '-' | '*'))
        .count();
    let numbered = NUMBERED_ITEM.find_iter(prompt).count();

    sentences(prompt).len() > 2 || bullets > 2 || numbered > 1
}

fn is_specific(prompt: &str) -> bool {
    prompt.split_whitespace().count() > SPECIFIC_WORD_COUNT
        || DIGIT.is_match(prompt)
        || contains_any(prompt, SPECIFICITY_KEYWORDS)
}

fn detect_tech_stack(prompt: &str) -> Vec<String> {
    TECH_PATTERNS
        .iter()
        .filter(|(_, regex)| regex.is_match(prompt))
        .map(|(bucket, _)| bucket.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn extract_purpose(prompt: &str) -> Option<String> {
    let sentences = sentences(prompt);
    sentences
        .iter()
        .take(3)
        .find(|s| has_purpose(s))
        .or_else(|| sentences.first())
        .map(|s| truncate_chars(s, 200))
}

/// Bullet and numbered list items in document order. Inline lists
/// ("with: - auth - tasks") are split on their markers; an item ends at the
/// end of its sentence.
fn extract_features(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .flat_map(|line| ITEM_MARKER.split(line).skip(1))
        .filter_map(|item| {
            let item = match item.find(". ") {
                Some(end) => &item[..end],
                None => item,
            };
            let item = item.trim().trim_end_matches('.').trim();
            (!item.is_empty()).then(|| item.to_string())
        })
        .take(MAX_FEATURES)
        .collect()
}

fn extract_constraints(prompt: &str) -> Vec<String> {
    sentences(prompt)
        .into_iter()
        .filter(|s| contains_any(s, CONSTRAINT_KEYWORDS))
        .map(|s| truncate_chars(s, 150))
        .take(MAX_CONSTRAINTS)
        .collect()
}

/// Large beats small beats the medium default.
fn determine_scale(prompt: &str) -> Scale {
    if contains_any(prompt, LARGE_INDICATORS) {
        Scale::Large
    } else if contains_any(prompt, SMALL_INDICATORS) {
        Scale::Small
    } else {
        Scale::Medium
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TASK_MANAGER: &str = "I want to build a task manager with: - auth - CRUD tasks - due dates. \
         Tech: Python FastAPI, React, PostgreSQL. Should scale to 1000 users.";

    fn gate() -> PromptQualityGate {
        PromptQualityGate::default()
    }

    #[test]
    fn test_task_manager_prompt_is_valid() {
        let report = gate().validate(TASK_MANAGER);
        assert!(report.valid, "issues: {:?}", report.issues);
        assert!(report.score >= 70, "score was {}", report.score);
        // short-but-acceptable length is only a warning
        assert!(report.warnings.iter().any(|w| w.starts_with("Prompt is short")));
    }

    #[test]
    fn test_too_short_prompt() {
        let report = gate().validate("make app");
        assert!(!report.valid);
        assert_eq!(report.issues[0], "Prompt too short (8 chars, minimum 50)");
        assert!(report.issues.contains(&"No features or functionality described".to_string()));
    }

    #[test]
    fn test_missing_purpose_is_an_issue() {
        let report = gate().validate(
            "A dashboard. It shows charts. It has filters. Data comes from a CSV file with 10 columns.",
        );
        assert!(!report.valid);
        assert_eq!(report.issues, vec!["Purpose unclear".to_string()]);
    }

    #[test]
    fn test_missing_tech_only_suggests() {
        let report = gate().validate(
            "I need a tool that tracks habits. Users log a habit daily. The tool shows streaks. \
             It sends reminders every 24 hours.",
        );
        assert!(report.valid);
        assert!(report.suggestions.iter().any(|s| s.contains("tech stack")));
        assert_eq!(report.score, 100 - 15 - 10);
    }

    #[test]
    fn test_question_warning() {
        let report = gate().validate("I need an app? Which db? Which UI? Hosting? Cost?");
        assert!(report.warnings.iter().any(|w| w.contains("Contains 5 questions")));
    }

    #[test]
    fn test_score_clamped() {
        let report = gate().validate("");
        assert_eq!(report.score, 0);
    }

    #[test]
    fn test_enhance_layout() {
        let mut context = BTreeMap::new();
        context.insert("team".to_string(), "2 devs".to_string());
        context.insert("deadline".to_string(), "friday".to_string());

        let enhanced = gate().enhance(TASK_MANAGER, Some(&context));
        assert!(enhanced.starts_with("SYSTEM CONTEXT:\n- Generate production-ready code"));
        assert!(enhanced.contains("DETECTED TECHNOLOGIES: database, javascript, python"));
        assert!(enhanced.contains("PROJECT SCALE: MEDIUM"));
        let deadline = enhanced.find("- deadline: friday").unwrap();
        let team = enhanced.find("- team: 2 devs").unwrap();
        assert!(deadline < team);
        assert!(enhanced.contains(&format!("USER REQUIREMENTS:\n{}", TASK_MANAGER)));
        assert!(enhanced.ends_with("proceed with implementation."));
    }

    #[test]
    fn test_enhance_is_deterministic() {
        assert_eq!(gate().enhance(TASK_MANAGER, None), gate().enhance(TASK_MANAGER, None));
    }

    #[test]
    fn test_enhance_scale_guidance() {
        let enhanced = gate().enhance("Build an enterprise CRM", None);
        assert!(enhanced.contains("PROJECT SCALE: LARGE"));
        assert!(enhanced.contains("- Consider microservices architecture"));
    }

    #[test]
    fn test_extract_requirements() {
        let req = gate().extract_requirements(TASK_MANAGER);
        assert_eq!(
            req.purpose.as_deref(),
            Some("I want to build a task manager with: - auth - CRUD tasks - due dates")
        );
        assert_eq!(req.features, vec!["auth", "CRUD tasks", "due dates"]);
        assert_eq!(req.tech_stack, vec!["database", "javascript", "python"]);
        assert_eq!(req.constraints, vec!["Should scale to 1000 users"]);
        assert_eq!(req.scale, Scale::Medium);
    }

    #[test]
    fn test_extract_numbered_features() {
        let req = gate().extract_requirements("Build a blog:\n1. Posts\n2) Comments\n3. Tags");
        assert_eq!(req.features, vec!["Posts", "Comments", "Tags"]);
    }

    #[test]
    fn test_scale_precedence() {
        assert_eq!(determine_scale("a simple but scalable app"), Scale::Large);
        assert_eq!(determine_scale("a quick prototype"), Scale::Small);
    }

    #[test]
    fn test_go_needs_context() {
        assert!(detect_tech_stack("ready to go live").is_empty());
        assert_eq!(detect_tech_stack("written in Go"), vec!["go"]);
    }

    proptest! {
        #[test]
        fn prop_validate_is_idempotent(prompt in ".{0,300}") {
            let first = gate().validate(&prompt);
            let second = gate().validate(&prompt);
            prop_assert_eq!(first.valid, second.valid);
            prop_assert_eq!(first.score, second.score);
        }

        #[test]
        fn prop_adding_features_and_purpose_never_lowers_score(
            prompt in "[a-zA-Z ,]{0,120}",
            features in prop::collection::vec("[a-z]{3,12}", 3..6),
        ) {
            let before = gate().validate(&prompt).score;
            let mut extended = prompt.clone();
            extended.push_str("\nI want to build this.");
            for feature in &features {
                extended.push_str(&format!("\n- {}", feature));
            }
            let after = gate().validate(&extended).score;
            prop_assert!(after >= before, "{} -> {}", before, after);
        }
    }
}
