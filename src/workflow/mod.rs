//! Workflow orchestration
//!
//! - [`WorkflowPipeline`]: validate → plan → (approval) → code → test, bounded
//!   by the iteration limit
//! - [`CriticLoop`]: critic review with refinement, integration or escalation
//! - [`Reconciler`]: fails stages left `active` past the stage timeout
//! - [`EventBus`]: persisted events with in-process fan-out

mod batch;
mod critic;
mod events;
mod pipeline;
mod reconcile;
mod registry;
mod result;

pub use batch::run_batch;
pub use critic::{
    AgentRefiner, CriticLoop, CriticReport, CriticResolution, PassthroughRefiner, Refiner,
    ReviewTarget,
};
pub use events::{
    CRITIC_APPROVED, CRITIC_DEGRADED, CRITIC_ESCALATED, EventBus, EventPublisher, ProjectEvents,
    SharedPublisher, WORKFLOW_AWAITING_APPROVAL, WORKFLOW_COMPLETED, WORKFLOW_FAILED,
    WORKFLOW_NEEDS_REFINEMENT, WORKFLOW_STARTED, is_settled_event,
};
pub use pipeline::{WorkflowPipeline, WorkflowRequest};
pub use reconcile::{ReconciledStage, Reconciler};
pub use registry::{RunRegistry, SharedRegistry};
pub use result::{PipelineStage, WorkflowResult};
