//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::agent::{AgentInvoker, select_capability};
use crate::ai::{SharedMetrics, TimeoutConfig, create_shared_metrics};
use crate::config::{Config, ConfigLoader, PROJECT_DIR};
use crate::storage::{Database, SharedDatabase};
use crate::types::{FlowError, Result};
use crate::workflow::{
    CriticLoop, EventBus, Reconciler, RunRegistry, SharedPublisher, SharedRegistry,
    WorkflowPipeline,
};

/// Command execution context
///
/// Owns the resources every command shares: configuration, the database,
/// the event bus and the in-process run registry.
#[derive(Clone)]
pub struct CommandContext {
    /// Project directory (.crewflow)
    pub project_dir: PathBuf,
    pub config: Config,
    pub db: SharedDatabase,
    pub bus: Arc<EventBus>,
    pub registry: SharedRegistry,
    pub metrics: SharedMetrics,
}

impl CommandContext {
    /// Validates initialization, loads config, and opens the database.
    pub fn load() -> Result<Self> {
        let project_dir = require_initialized()?;
        let config = ConfigLoader::load()?;
        Self::from_parts(project_dir, config)
    }

    pub fn from_parts(project_dir: PathBuf, config: Config) -> Result<Self> {
        let db = Arc::new(open_database(&config.storage.database_path)?);
        Ok(Self {
            project_dir,
            bus: Arc::new(EventBus::new(Arc::clone(&db))),
            db,
            config,
            registry: Arc::new(RunRegistry::new()),
            metrics: create_shared_metrics(uuid::Uuid::new_v4().to_string()),
        })
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::from_config(&self.config)
    }

    pub fn publisher(&self) -> SharedPublisher {
        self.bus.clone()
    }

    /// Pick the agent backend from `[llm]` and wrap it in an invoker
    pub async fn invoker(&self) -> Result<AgentInvoker> {
        let capability = select_capability(&self.config.llm, Some(Arc::clone(&self.metrics))).await?;
        Ok(AgentInvoker::new(capability)
            .with_timeout(self.timeouts().agent_invocation)
            .with_metrics(Arc::clone(&self.metrics)))
    }

    pub async fn pipeline(&self) -> Result<WorkflowPipeline> {
        Ok(WorkflowPipeline::new(
            Arc::clone(&self.db),
            self.invoker().await?,
            self.publisher(),
            Arc::clone(&self.registry),
        )
        .with_config(self.config.workflow.clone())
        .with_prompt_config(self.config.prompt.clone()))
    }

    pub async fn critic(&self) -> Result<CriticLoop> {
        Ok(CriticLoop::new(
            Arc::clone(&self.db),
            self.invoker().await?,
            self.publisher(),
            Arc::clone(&self.registry),
        )
        .with_max_iterations(self.config.workflow.max_critic_iterations))
    }

    pub fn reconciler(&self, stage_timeout: Duration) -> Reconciler {
        Reconciler::new(Arc::clone(&self.db), self.publisher(), stage_timeout)
    }

    /// Default project id: the working directory name
    pub fn default_project_id(&self) -> String {
        std::env::current_dir()
            .ok()
            .and_then(|dir| dir.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .unwrap_or_else(|| "default".to_string())
    }
}

/// Returns the .crewflow directory path, or `FlowError::NotInitialized`.
pub fn require_initialized() -> Result<PathBuf> {
    let project_dir = Path::new(PROJECT_DIR);

    if !project_dir.exists() {
        return Err(FlowError::NotInitialized);
    }

    Ok(project_dir.to_path_buf())
}

pub fn is_initialized() -> bool {
    Path::new(PROJECT_DIR).exists()
}

/// Open (creating if needed) the database and bring its schema up to date
pub fn open_database(path: &Path) -> Result<Database> {
    debug!("Opening database at {}", path.display());
    Database::open_initialized(path)
}

// Tests avoid `load()`: changing the current directory races with parallel tests.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewRun;
    use crate::types::RunId;

    fn context(dir: &Path) -> CommandContext {
        let mut config = Config::default();
        config.llm.provider = "simulated".to_string();
        config.storage.database_path = dir.join("nested/crewflow.db");
        CommandContext::from_parts(dir.join(PROJECT_DIR), config).unwrap()
    }

    #[test]
    fn test_open_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/crewflow.db");

        let db = open_database(&path).unwrap();
        assert!(path.exists());
        assert!(db.recent_runs(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crewflow.db");
        let run_id = RunId::generate();

        open_database(&path)
            .unwrap()
            .create_run(&NewRun {
                id: &run_id,
                project_id: "proj",
                task_id: None,
                original_prompt: "prompt",
                iteration: 1,
            })
            .unwrap();

        let reopened = open_database(&path).unwrap();
        assert_eq!(reopened.require_run(&run_id).unwrap().project_id, "proj");
    }

    #[tokio::test]
    async fn test_context_builds_simulated_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let invoker = ctx.invoker().await.unwrap();
        assert!(invoker.is_simulated());

        let pipeline = ctx.pipeline().await.unwrap();
        assert_eq!(pipeline.config().max_iterations, ctx.config.workflow.max_iterations);
    }
}
