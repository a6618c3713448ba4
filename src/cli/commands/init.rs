//! Init Command
//!
//! Initialize crewflow in the current directory.

use crate::cli::ui::Output;
use crate::cli::util::open_database;
use crate::config::{ConfigLoader, PROJECT_DIR};
use crate::types::{FlowError, Result};

pub fn run(force: bool) -> Result<()> {
    let root = std::env::current_dir()?;
    let project_dir = root.join(PROJECT_DIR);

    if project_dir.exists() && !force {
        return Err(FlowError::Config(
            "Already initialized. Use --force to overwrite.".to_string(),
        ));
    }

    ConfigLoader::init_project_at(&root, force)?;

    // Never overwrite an existing global config from here
    if let Err(e) = ConfigLoader::init_global(false) {
        tracing::debug!("Global config init skipped: {}", e);
    }

    let config = ConfigLoader::load()?;
    open_database(&config.storage.database_path)?;

    let out = Output::new();
    out.success(&format!("Initialized crewflow in {}/", PROJECT_DIR));
    out.field("Database", config.storage.database_path.display());
    out.field("Backend", &config.llm.provider);
    println!();
    println!("Next steps:");
    println!("  1. crewflow run \"<what you want built>\"");
    println!("  2. crewflow approve <RUN_ID> once the specification looks right");

    Ok(())
}
