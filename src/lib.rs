//! crewflow - Multi-Agent Workflow Orchestrator
//!
//! Turns a natural-language project request into a reviewed specification,
//! generated code and tests, driven by role-specialized agents.
//!
//! ## Core Features
//!
//! - **Prompt Quality Gate**: scores and enhances prompts before any agent runs
//! - **Workflow Pipeline**: plan → (approval) → code → test, bounded iterations
//! - **Critic Loop**: review with refinement, then integration or escalation
//! - **Durable Records**: every stage, artifact and event lands in SQLite
//! - **Simulated Backend**: deterministic agents when no live provider is available
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use crewflow::{AgentInvoker, Database, EventBus, RunRegistry, SimulatedProvider, WorkflowPipeline};
//!
//! let db = Arc::new(Database::open_initialized(".crewflow/crewflow.db")?);
//! let invoker = AgentInvoker::new(Arc::new(SimulatedProvider::new()));
//! let pipeline = WorkflowPipeline::new(
//!     Arc::clone(&db),
//!     invoker,
//!     Arc::new(EventBus::new(Arc::clone(&db))),
//!     Arc::new(RunRegistry::new()),
//! );
//! let result = pipeline.execute_workflow("my-project", prompt, None, 1).await;
//! ```
//!
//! ## Modules
//!
//! - [`prompt`]: prompt validation, enhancement and requirement extraction
//! - [`agent`]: agent roles, capability trait, simulated and live backends
//! - [`parser`]: strict parsing and validation of agent outputs
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`workflow`]: pipeline, critic loop, reconciliation, events

pub mod agent;
pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod parser;
pub mod prompt;
pub mod storage;
pub mod types;
pub mod workflow;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, LlmConfig, PromptConfig, WorkflowConfig};

// Error Types
pub use types::error::{ErrorCategory, FlowError, Result, ResultExt};
pub use types::{RunId, StageId};

// Storage
pub use storage::{Database, PoolConfig, SharedDatabase, StageKind, StageStatus, WorkflowStatus};

// =============================================================================
// Workflow Re-exports
// =============================================================================

pub use workflow::{
    CriticLoop, CriticReport, CriticResolution, EventBus, EventPublisher, PipelineStage,
    Reconciler, RunRegistry, WorkflowPipeline, WorkflowRequest, WorkflowResult, run_batch,
};

// =============================================================================
// Agent Re-exports
// =============================================================================

pub use agent::{AgentCapability, AgentInvoker, AgentResult, AgentRole, SimulatedProvider};
pub use ai::{MetricsCollector, SharedMetrics, TimeoutConfig, with_timeout};
pub use prompt::{PromptQualityGate, ValidationReport};
