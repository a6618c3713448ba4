//! Workflow outcome reported to callers and serialized by the CLI.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::parser::{CodeFile, TestFile};
use crate::prompt::ValidationReport;
use crate::storage::WorkflowStatus;
use crate::types::RunId;

/// Stage a result settled at. `Validation` and `Unknown` have no stage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Validation,
    Planner,
    Coder,
    Tester,
    Unknown,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow_id: RunId,
    pub project_id: String,
    pub iteration: u32,
    pub status: WorkflowStatus,
    pub stage: PipelineStage,
    /// Per-stage summaries keyed by stage name
    pub stages: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specification: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_files: Option<Vec<CodeFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_files: Option<Vec<TestFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_iterate: Option<bool>,
}

impl WorkflowResult {
    /// A `running` result with nothing recorded yet
    pub fn new(workflow_id: RunId, project_id: impl Into<String>, iteration: u32) -> Self {
        Self {
            workflow_id,
            project_id: project_id.into(),
            iteration,
            status: WorkflowStatus::Running,
            stage: PipelineStage::Validation,
            stages: BTreeMap::new(),
            specification: None,
            code_files: None,
            test_files: None,
            review: None,
            test_summary: None,
            error: None,
            message: None,
            validation: None,
            enhanced_prompt: None,
            validation_score: None,
            can_iterate: None,
        }
    }

    pub fn failed(mut self, stage: PipelineStage, error: impl Into<String>) -> Self {
        self.status = WorkflowStatus::Failed;
        self.stage = stage;
        self.error = Some(error.into());
        self
    }

    pub fn settled(mut self, status: WorkflowStatus, stage: PipelineStage, message: impl Into<String>) -> Self {
        self.status = status;
        self.stage = stage;
        self.message = Some(message.into());
        self
    }

    pub fn with_stage_summary(mut self, stage: PipelineStage, summary: Value) -> Self {
        self.stages.insert(stage.as_str().to_string(), summary);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == WorkflowStatus::Failed
    }

    /// True for a `needs_refinement` result that may be re-entered
    pub fn can_iterate(&self) -> bool {
        self.status == WorkflowStatus::NeedsRefinement && self.can_iterate == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_result_serialization() {
        let result = WorkflowResult::new(RunId::from("run-1"), "proj", 1)
            .failed(PipelineStage::Validation, "Prompt validation failed");

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["workflow_id"], "run-1");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["stage"], "validation");
        assert_eq!(value["stages"], json!({}));
        assert_eq!(value["error"], "Prompt validation failed");
        assert!(value.get("specification").is_none());
        assert!(value.get("can_iterate").is_none());
    }

    #[test]
    fn test_settled_with_stage_summary() {
        let result = WorkflowResult::new(RunId::from("run-2"), "proj", 2)
            .with_stage_summary(
                PipelineStage::Planner,
                json!({"status": "skipped", "reason": "Using pre-approved specification"}),
            )
            .settled(WorkflowStatus::Completed, PipelineStage::Tester, "done");

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["stages"]["planner"]["status"], "skipped");
        assert_eq!(value["message"], "done");
        assert!(!result.can_iterate());
    }
}
