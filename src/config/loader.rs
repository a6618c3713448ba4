//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (`<config dir>/crewflow/config.toml`)
//! 3. Project config (.crewflow/config.toml)
//! 4. Environment variables (CREWFLOW_ prefix, `__` between section and key)

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{FlowError, Result};

/// Project data directory name
pub const PROJECT_DIR: &str = ".crewflow";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_layers(
            Self::global_config_path().as_deref(),
            &Self::project_config_path(),
        )
    }

    /// Load from explicit global/project files plus the environment.
    pub fn load_layers(global: Option<&Path>, project: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = global
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(global_path));
        }

        if project.exists() {
            debug!("Loading project config from: {}", project.display());
            figment = figment.merge(Toml::file(project));
        }

        // CREWFLOW_WORKFLOW__MAX_ITERATIONS -> workflow.max_iterations
        figment = figment.merge(Env::prefixed("CREWFLOW_").split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| FlowError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| FlowError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Platform config directory for crewflow
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "crewflow").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(PROJECT_DIR)
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    pub fn is_project_initialized() -> bool {
        Self::project_dir().exists()
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write the global config file, returning its path
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            FlowError::Config("Cannot determine global config directory".to_string())
        })?;
        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_config_toml("Global"))?;
            info!("Created global config: {}", config_path.display());
        } else {
            info!("Global config exists: {}", config_path.display());
        }

        Ok(config_path)
    }

    /// Create `.crewflow/` under `root` with a default project config
    pub fn init_project_at(root: &Path, force: bool) -> Result<PathBuf> {
        let project_dir = root.join(PROJECT_DIR);
        fs::create_dir_all(&project_dir)?;

        let config_path = project_dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_config_toml("Project"))?;
            info!("Created project config: {}", config_path.display());
        }

        Ok(project_dir)
    }

    /// Render the given config as TOML
    pub fn to_toml(config: &Config) -> Result<String> {
        toml::to_string_pretty(config).map_err(|e| FlowError::Config(e.to_string()))
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn default_config_toml(scope: &str) -> String {
        format!(
            r#"# crewflow {scope} Configuration
# Environment variables override these, e.g. CREWFLOW_WORKFLOW__MAX_ITERATIONS=5

version = "1.0"

[llm]
# simulated | claude-code | anthropic
provider = "claude-code"
model = "claude-sonnet-4-20250514"
timeout_secs = 300
fallback_to_simulation = true

[workflow]
max_iterations = 3
require_user_approval = true
max_critic_iterations = 3
stage_timeout_secs = 1800
batch_concurrency = 4

[prompt]
min_length = 50
recommended_length = 200
max_length = 5000
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_without_files_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            ConfigLoader::load_layers(None, &temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.workflow.max_critic_iterations, 3);
    }

    #[test]
    fn test_project_overrides_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        let project = temp_dir.path().join("project.toml");
        fs::write(
            &global,
            "[workflow]\nmax_iterations = 5\nrequire_user_approval = false\n",
        )
        .unwrap();
        fs::write(&project, "[workflow]\nmax_iterations = 2\n").unwrap();

        let config = ConfigLoader::load_layers(Some(&global), &project).unwrap();
        assert_eq!(config.workflow.max_iterations, 2);
        assert!(!config.workflow.require_user_approval);
    }

    #[test]
    fn test_init_project_writes_loadable_config() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ConfigLoader::init_project_at(temp_dir.path(), false).unwrap();
        let config = ConfigLoader::load_from_file(&dir.join("config.toml")).unwrap();
        assert_eq!(config.llm.provider, "claude-code");
        assert!(config.llm.fallback_to_simulation);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "[llm]\nprovider = \"carrier-pigeon\"\n").unwrap();
        assert!(matches!(
            ConfigLoader::load_from_file(&path),
            Err(FlowError::Config(_))
        ));
    }

    #[test]
    fn test_env_override() {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: only this test touches CREWFLOW_LLM__MODEL
        unsafe {
            std::env::set_var("CREWFLOW_LLM__MODEL", "test-model");
        }
        let config =
            ConfigLoader::load_layers(None, &temp_dir.path().join("missing.toml")).unwrap();
        unsafe {
            std::env::remove_var("CREWFLOW_LLM__MODEL");
        }
        assert_eq!(config.llm.model, "test-model");
    }

    #[test]
    fn test_to_toml_round_trips() {
        let rendered = ConfigLoader::to_toml(&Config::default()).unwrap();
        assert!(rendered.contains("[workflow]"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.workflow.max_iterations, 3);
    }
}
