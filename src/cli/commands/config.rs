//! Config Command
//!
//! Usage:
//!   crewflow config show [-g] [-f json|yaml]
//!   crewflow config path
//!   crewflow config init [-g] [--force]

use crate::cli::ui::{Output, OutputFormat, print_json};
use crate::config::ConfigLoader;
use crate::types::{FlowError, Result};

/// Show the merged configuration, or the raw global file with `global`
pub fn show(global: bool, format: OutputFormat) -> Result<()> {
    if global {
        let Some(global_path) = ConfigLoader::global_config_path() else {
            println!("Cannot determine global config directory.");
            return Ok(());
        };
        if global_path.exists() {
            println!("# Global Config: {}\n", global_path.display());
            println!("{}", std::fs::read_to_string(&global_path)?);
        } else {
            println!("No global config found.");
            println!("Run 'crewflow config init --global' to create one.");
        }
        return Ok(());
    }

    let config = ConfigLoader::load()?;
    match format {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&config)?),
        OutputFormat::Text => print!("{}", ConfigLoader::to_toml(&config)?),
    }
    Ok(())
}

pub fn path() -> Result<()> {
    let out = Output::new();
    out.header("Configuration paths");
    match ConfigLoader::global_config_path() {
        Some(path) => out.field("Global", path.display()),
        None => out.field("Global", "(unavailable)"),
    }
    out.field("Project", ConfigLoader::project_config_path().display());

    let config = ConfigLoader::load()?;
    out.field("Database", config.storage.database_path.display());
    Ok(())
}

pub fn init(global: bool, force: bool) -> Result<()> {
    let out = Output::new();
    if global {
        let path = ConfigLoader::init_global(force)?;
        out.success("Initialized global configuration");
        out.field("Config", path.display());
        return Ok(());
    }

    let root = std::env::current_dir().map_err(FlowError::Io)?;
    let dir = ConfigLoader::init_project_at(&root, force)?;
    out.success("Initialized project configuration");
    out.field("Directory", dir.display());
    out.field("Config", ConfigLoader::project_config_path().display());
    Ok(())
}
