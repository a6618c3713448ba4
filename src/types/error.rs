//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//!
//! ## Error Categories
//!
//! Provider failures are classified so the agent adapter can log an
//! actionable category next to the message:
//!
//! - **RateLimit**: API rate limiting
//! - **TokenLimit**: Context too large
//! - **Auth**: Authentication failures
//! - **Network**: Connectivity issues and timeouts
//! - **Unavailable**: Provider missing or down
//!
//! ## Workflow Errors
//!
//! Workflow-level failures are normally reported as terminal `WorkflowResult`s,
//! not as `FlowError`s. The variants here cover the places where a caller does
//! get an `Err`: storage, configuration, stage lifecycle misuse, and the two
//! distinct critic-loop failures (`CriticRejected` vs `CriticExhausted`).

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories for classifying provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited by the provider
    RateLimit,
    /// Context/token limit exceeded
    TokenLimit,
    /// Authentication failed
    Auth,
    /// Network/connectivity issues
    Network,
    /// Provider unavailable or not installed
    Unavailable,
    /// Invalid request
    BadRequest,
    /// Provider response could not be parsed
    ParseError,
    /// Temporary server issues
    Transient,
    /// Unknown error
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Whether a later, independent resubmission is likely to succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::ParseError
        )
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// LLM error with category and provider context
#[derive(Debug, Clone)]
pub struct LlmError {
    pub category: ErrorCategory,
    pub message: String,
    pub provider: Option<String>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
        }
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Message-based classifier for provider errors
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();

        let category = if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            ErrorCategory::RateLimit
        } else if lower.contains("token")
            && (lower.contains("limit") || lower.contains("exceed") || lower.contains("maximum"))
            || lower.contains("context length")
            || lower.contains("too large")
        {
            ErrorCategory::TokenLimit
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("permission denied")
        {
            ErrorCategory::Auth
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
        {
            ErrorCategory::Network
        } else if lower.contains("503")
            || lower.contains("502")
            || lower.contains("service unavailable")
            || lower.contains("not found")
            || lower.contains("not installed")
            || lower.contains("failed to spawn")
        {
            ErrorCategory::Unavailable
        } else if lower.contains("400") || lower.contains("bad request") {
            ErrorCategory::BadRequest
        } else if lower.contains("parse") || lower.contains("json") {
            ErrorCategory::ParseError
        } else if lower.contains("overloaded")
            || lower.contains("temporary")
            || lower.contains("non-zero status")
        {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Unknown
        };

        LlmError::with_provider(category, message, provider)
    }

    /// Classify an HTTP status code directly
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 => ErrorCategory::BadRequest,
            500 | 502 | 503 | 504 | 529 => ErrorCategory::Transient,
            404 => ErrorCategory::Unavailable,
            _ => ErrorCategory::Unknown,
        };
        LlmError::with_provider(category, message, provider)
    }

    /// Classify any FlowError raised while invoking a provider
    pub fn classify_flow_error(err: &FlowError, provider: &str) -> LlmError {
        match err {
            FlowError::Llm(llm_err) => llm_err.clone(),
            FlowError::LlmApi(msg) => Self::classify(msg, provider),
            FlowError::Timeout { .. } => {
                LlmError::with_provider(ErrorCategory::Network, err.to_string(), provider)
            }
            FlowError::Json(_) => {
                LlmError::with_provider(ErrorCategory::ParseError, err.to_string(), provider)
            }
            FlowError::Config(_) => {
                LlmError::with_provider(ErrorCategory::BadRequest, err.to_string(), provider)
            }
            _ => Self::classify(&err.to_string(), provider),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Structured validation error with context
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Field or component that failed validation
    pub field: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Validation failed for '{}': {}", field, self.message)
        } else {
            write!(f, "Validation failed: {}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            message: message.into(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn missing_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::MissingField, message).with_field(field)
    }
}

/// Validation error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Wrong JSON type for a value
    Schema,
    /// Required field missing
    MissingField,
    /// Value outside an allowed set or range
    Range,
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum FlowError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // -------------------------------------------------------------------------
    // LLM Errors
    // -------------------------------------------------------------------------
    #[error("LLM error: {0}")]
    Llm(LlmError),

    #[error("LLM API error: {0}")]
    LlmApi(String),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Validation(ValidationError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not initialized: run 'crewflow init' first")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Stage lifecycle misuse (e.g. completing a stage twice)
    #[error("Stage state error: {0}")]
    StageState(String),

    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: String },

    // -------------------------------------------------------------------------
    // Critic Loop Errors
    // -------------------------------------------------------------------------
    /// Reviewer said no; a human decision is required
    #[error("Critic rejected the implementation at iteration {iteration}: {feedback}")]
    CriticRejected { iteration: u32, feedback: String },

    /// Ran out of review attempts without approval or rejection
    #[error("Critic loop exhausted after {iterations} iterations without approval")]
    CriticExhausted { iterations: u32 },
}

impl From<LlmError> for FlowError {
    fn from(err: LlmError) -> Self {
        FlowError::Llm(err)
    }
}

impl From<ValidationError> for FlowError {
    fn from(err: ValidationError) -> Self {
        FlowError::Validation(err)
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return FlowError::Io(std::io::Error::new(io_err.kind(), io_err.to_string()));
        }
        FlowError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl FlowError {
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether resubmitting the same request later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Llm(e) => e.category.is_transient(),
            Self::Timeout { .. } | Self::CriticExhausted { .. } => true,
            _ => false,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Lazy variant of `with_context`
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| FlowError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| FlowError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorCategory::Unavailable.to_string(), "UNAVAILABLE");
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = ErrorClassifier::classify("Rate limit exceeded, please retry", "anthropic");
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert!(err.category.is_transient());
    }

    #[test]
    fn test_classify_missing_cli() {
        let err = ErrorClassifier::classify(
            "Failed to spawn Claude Code CLI: No such file. Is it installed?",
            "claude-code",
        );
        assert_eq!(err.category, ErrorCategory::Unavailable);
        assert!(!err.category.is_transient());
    }

    #[test]
    fn test_classify_timeout_error() {
        let err = FlowError::timeout("planner invocation", Duration::from_secs(5));
        let llm = ErrorClassifier::classify_flow_error(&err, "claude-code");
        assert_eq!(llm.category, ErrorCategory::Network);
    }

    #[test]
    fn test_classify_http_status() {
        assert_eq!(
            ErrorClassifier::classify_http_status(429, "slow down", "x").category,
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorClassifier::classify_http_status(529, "overloaded", "x").category,
            ErrorCategory::Transient
        );
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::with_provider(ErrorCategory::Auth, "bad key", "anthropic");
        assert_eq!(err.to_string(), "[anthropic:AUTH] bad key");
    }

    #[test]
    fn test_critic_errors_are_distinct() {
        let rejected = FlowError::CriticRejected {
            iteration: 1,
            feedback: "insecure".into(),
        };
        let exhausted = FlowError::CriticExhausted { iterations: 3 };
        assert!(!rejected.is_transient());
        assert!(exhausted.is_transient());
        assert!(rejected.to_string().contains("rejected"));
        assert!(exhausted.to_string().contains("exhausted"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::missing_field("files", "Output must contain 'files' key");
        assert_eq!(
            err.to_string(),
            "Validation failed for 'files': Output must contain 'files' key"
        );
    }
}
