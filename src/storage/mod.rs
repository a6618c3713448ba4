//! SQLite Persistence
//!
//! One pooled [`Database`] holds every table; each submodule adds the
//! operations for its tables.

pub mod artifacts;
pub mod database;
pub mod events;
pub mod runs;
pub mod stages;

pub use artifacts::{ArtifactOwner, ArtifactRecord, ArtifactType, NewArtifact};
pub use database::{Database, PoolConfig, SharedDatabase};
pub use events::EventRecord;
pub use runs::{
    CriticFeedbackRecord, NewCriticFeedback, NewRun, RunRecord, RunUpdate, TaskRecord, TaskStatus,
    WorkflowStatus,
};
pub use stages::{StageKind, StageRecord, StageStatus};
