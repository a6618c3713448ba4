//! Configuration Management
//!
//! Unified configuration system with hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (platform config dir, `crewflow/config.toml`)
//! 3. Project config (.crewflow/config.toml)
//! 4. Environment variables (CREWFLOW_SECTION__KEY)
//! 5. CLI arguments (highest priority)

mod loader;
mod types;

pub use loader::{ConfigLoader, PROJECT_DIR};
pub use types::*;
