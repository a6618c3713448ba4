//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global and project (.crewflow/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{network, prompt, workflow};
use crate::types::{FlowError, Result};

/// Providers accepted in `llm.provider`
pub const SUPPORTED_PROVIDERS: &[&str] = &["simulated", "claude-code", "anthropic"];

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// LLM provider settings
    pub llm: LlmConfig,

    /// Pipeline behaviour
    pub workflow: WorkflowConfig,

    /// Prompt quality gate thresholds
    pub prompt: PromptConfig,

    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            workflow: WorkflowConfig::default(),
            prompt: PromptConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `FlowError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(FlowError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.llm.provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }

        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(FlowError::Config(format!(
                "LLM temperature must be between 0.0 and 1.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(FlowError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.workflow.max_iterations == 0 {
            return Err(FlowError::Config(
                "workflow.max_iterations must be at least 1".to_string(),
            ));
        }

        if self.workflow.max_critic_iterations == 0 {
            return Err(FlowError::Config(
                "workflow.max_critic_iterations must be at least 1".to_string(),
            ));
        }

        if self.workflow.batch_concurrency == 0 {
            return Err(FlowError::Config(
                "workflow.batch_concurrency must be at least 1".to_string(),
            ));
        }

        if self.prompt.min_length > self.prompt.recommended_length
            || self.prompt.recommended_length > self.prompt.max_length
        {
            return Err(FlowError::Config(format!(
                "Prompt lengths must satisfy min <= recommended <= max, got {} / {} / {}",
                self.prompt.min_length, self.prompt.recommended_length, self.prompt.max_length
            )));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: simulated, claude-code, anthropic
    pub provider: String,

    /// Model name
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Temperature for LLM generation (0.0 = deterministic)
    pub temperature: f32,

    /// Custom API endpoint (anthropic provider only)
    pub api_base: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: usize,

    /// Use the simulated provider when the live one is unavailable
    pub fallback_to_simulation: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "claude-code".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            temperature: 0.0,
            api_base: None,
            max_tokens: 8192,
            fallback_to_simulation: true,
        }
    }
}

// =============================================================================
// Workflow Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Coder/tester iterations before a run fails
    pub max_iterations: u32,

    /// Suspend after planning until the specification is approved
    pub require_user_approval: bool,

    /// Critic review iterations before escalation
    pub max_critic_iterations: u32,

    /// Stages active longer than this are reconciled as failed
    pub stage_timeout_secs: u64,

    /// Concurrent runs in `crewflow batch`
    pub batch_concurrency: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: workflow::DEFAULT_MAX_ITERATIONS,
            require_user_approval: true,
            max_critic_iterations: workflow::DEFAULT_MAX_CRITIC_ITERATIONS,
            stage_timeout_secs: workflow::DEFAULT_STAGE_TIMEOUT_SECS,
            batch_concurrency: workflow::DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

// =============================================================================
// Prompt Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub min_length: usize,
    pub recommended_length: usize,
    pub max_length: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            min_length: prompt::MIN_LENGTH,
            recommended_length: prompt::RECOMMENDED_LENGTH,
            max_length: prompt::MAX_LENGTH,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".crewflow/crewflow.db"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.llm.provider, "claude-code");
        assert_eq!(config.workflow.max_iterations, 3);
        assert!(config.workflow.require_user_approval);
        assert_eq!(config.prompt.min_length, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "ollama".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut config = Config::default();
        config.workflow.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_prompt_thresholds_ordered() {
        let mut config = Config::default();
        config.prompt.min_length = 500;
        assert!(config.validate().is_err());
    }
}
