//! Workflow Pipeline
//!
//! ```text
//! validating → planning → awaiting_approval → coding → testing
//!                                                 ↓
//!                         needs_refinement ← blocking issues → completed | failed
//! ```
//!
//! Every outcome, including agent failures and unexpected errors, is returned
//! as a [`WorkflowResult`]. Stages run strictly one after another; each one
//! is recorded `active` before its agent call and completed exactly once.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::events::{
    SharedPublisher, WORKFLOW_AWAITING_APPROVAL, WORKFLOW_COMPLETED, WORKFLOW_FAILED,
    WORKFLOW_NEEDS_REFINEMENT, WORKFLOW_STARTED,
};
use super::registry::SharedRegistry;
use super::result::{PipelineStage, WorkflowResult};
use crate::agent::prompt::{coder_task, planner_task, tester_task};
use crate::agent::{AgentInvoker, AgentResult, AgentRole, RoleConfig};
use crate::config::{PromptConfig, WorkflowConfig};
use crate::parser::{
    code_files, generate_test_summary, has_blocking_issues, parse_code_output,
    parse_specification, parse_test_output, test_files, validate_code_output,
    validate_specification, validate_test_output,
};
use crate::prompt::PromptQualityGate;
use crate::storage::{
    ArtifactOwner, ArtifactType, NewArtifact, NewRun, RunUpdate, SharedDatabase, StageKind,
    StageStatus, TaskStatus, WorkflowStatus,
};
use crate::types::{Result, RunId, json_for_prompt, log_filter_warn};

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub project_id: String,
    pub user_prompt: String,
    /// Skips validation and planning when present
    pub approved_spec: Option<Value>,
    pub iteration: u32,
    /// Continue an existing run instead of starting a new one
    pub run_id: Option<RunId>,
    pub task_id: Option<String>,
    /// Tester review from the previous iteration, handed to the coder
    pub review_feedback: Option<Value>,
}

impl WorkflowRequest {
    pub fn new(project_id: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            user_prompt: user_prompt.into(),
            approved_spec: None,
            iteration: 1,
            run_id: None,
            task_id: None,
            review_feedback: None,
        }
    }

    pub fn with_approved_spec(mut self, specification: Value) -> Self {
        self.approved_spec = Some(specification);
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_review_feedback(mut self, review: Value) -> Self {
        self.review_feedback = Some(review);
        self
    }
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct WorkflowPipeline {
    db: SharedDatabase,
    invoker: AgentInvoker,
    events: SharedPublisher,
    registry: SharedRegistry,
    gate: PromptQualityGate,
    config: WorkflowConfig,
}

impl WorkflowPipeline {
    pub fn new(
        db: SharedDatabase,
        invoker: AgentInvoker,
        events: SharedPublisher,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            db,
            invoker,
            events,
            registry,
            gate: PromptQualityGate::default(),
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_prompt_config(mut self, config: PromptConfig) -> Self {
        self.gate = PromptQualityGate::new(config);
        self
    }

    pub fn with_require_approval(mut self, require: bool) -> Self {
        self.config.require_user_approval = require;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run the pipeline once for a prompt, or from an approved specification
    pub async fn execute_workflow(
        &self,
        project_id: &str,
        user_prompt: &str,
        approved_spec: Option<Value>,
        iteration: u32,
    ) -> WorkflowResult {
        let mut request = WorkflowRequest::new(project_id, user_prompt).with_iteration(iteration);
        request.approved_spec = approved_spec;
        self.execute(request).await
    }

    /// Re-run with the user's refinement notes folded into the prompt
    pub async fn refine_workflow(
        &self,
        project_id: &str,
        original_prompt: &str,
        refinement_notes: &str,
        previous_spec: &Value,
        iteration: u32,
    ) -> WorkflowResult {
        info!(
            "Refining workflow for project {} (iteration {})",
            project_id, iteration
        );
        let refined_prompt = format!(
            "ORIGINAL PROMPT:\n{}\n\nREFINEMENT NOTES (from user):\n{}\n\n\
             PREVIOUS SPECIFICATION (for reference):\n{}\n\n\
             Please update the implementation based on the refinement notes.",
            original_prompt.trim(),
            refinement_notes.trim(),
            json_for_prompt(previous_spec)
        );
        self.execute_workflow(project_id, &refined_prompt, None, iteration)
            .await
    }

    /// Execute, re-entering with `iteration + 1` and the review while the
    /// result asks for refinement. Stops at any other status.
    pub async fn execute_until_settled(&self, request: WorkflowRequest) -> WorkflowResult {
        let mut request = request;
        loop {
            let result = self.execute(request.clone()).await;
            if !result.can_iterate() {
                return result;
            }

            info!(
                "Workflow {}: re-entering at iteration {}",
                result.workflow_id,
                result.iteration + 1
            );
            request = WorkflowRequest {
                run_id: Some(result.workflow_id.clone()),
                iteration: result.iteration + 1,
                approved_spec: result.specification.clone(),
                review_feedback: result.review.clone(),
                ..request
            };
        }
    }

    #[instrument(skip(self, request), fields(project = %request.project_id, iteration = request.iteration))]
    pub async fn execute(&self, request: WorkflowRequest) -> WorkflowResult {
        let run_id = request.run_id.clone().unwrap_or_else(RunId::generate);
        self.registry.register(&run_id);

        let outcome = AssertUnwindSafe(self.run_stages(&run_id, &request))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Workflow {}: unexpected error: {}", run_id, e);
                WorkflowResult::new(run_id.clone(), &request.project_id, request.iteration)
                    .failed(PipelineStage::Unknown, format!("Unexpected error: {}", e))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                warn!("Workflow {}: panicked: {}", run_id, message);
                WorkflowResult::new(run_id.clone(), &request.project_id, request.iteration)
                    .failed(PipelineStage::Unknown, format!("Unexpected error: {}", message))
            }
        };

        self.finish(&run_id, &result).await;
        self.registry.unregister(&run_id);
        result
    }

    async fn run_stages(&self, run_id: &RunId, request: &WorkflowRequest) -> Result<WorkflowResult> {
        let iteration = request.iteration;
        let project_id = request.project_id.as_str();
        let mut result = WorkflowResult::new(run_id.clone(), project_id, iteration);

        let task_id = self.open_run(run_id, request)?;
        self.publish(
            project_id,
            WORKFLOW_STARTED,
            json!({
                "workflow_id": run_id,
                "iteration": iteration,
                "resumed": request.run_id.is_some(),
            }),
        )
        .await;

        // ===== Validating =====
        let max = self.config.max_iterations;
        if iteration == 0 || iteration > max {
            return Ok(result.failed(
                PipelineStage::Validation,
                format!("Iteration {} is outside the allowed range 1..={}", iteration, max),
            ));
        }

        let specification = match &request.approved_spec {
            Some(approved) => {
                self.db.store_approved_specification(run_id, approved)?;
                result = result.with_stage_summary(
                    PipelineStage::Planner,
                    json!({"status": "skipped", "reason": "Using pre-approved specification"}),
                );
                approved.clone()
            }
            None => {
                let report = self.gate.validate(&request.user_prompt);
                if !report.valid {
                    warn!("Workflow {}: prompt validation failed", run_id);
                    result.validation = Some(report);
                    return Ok(result.failed(PipelineStage::Validation, "Prompt validation failed"));
                }

                let enhanced = self.gate.enhance(&request.user_prompt, None);
                self.db.store_run_prompt(run_id, &enhanced, report.score)?;
                result.validation_score = Some(report.score);

                // ===== Planning =====
                if self.is_cancelled(run_id)? {
                    return Ok(cancelled(result, PipelineStage::Planner));
                }
                let planner = self
                    .run_agent_stage(run_id, StageKind::Planner, iteration, AgentRole::Planner, &planner_task(&enhanced))
                    .await?;
                result.enhanced_prompt = Some(enhanced);
                result = result.with_stage_summary(PipelineStage::Planner, stage_summary(&planner));

                let Some(output) = planner.output_value() else {
                    return Ok(result.failed(PipelineStage::Planner, planner.error_message()));
                };
                let specification = parse_specification(&output);
                if let Err(e) = validate_specification(&specification) {
                    warn!("Workflow {}: invalid specification: {}", run_id, e);
                    return Ok(result.failed(
                        PipelineStage::Planner,
                        format!("Invalid specification: {}", e.message),
                    ));
                }
                self.db.store_specification(run_id, &specification)?;

                if self.config.require_user_approval {
                    info!("Workflow {}: awaiting approval", run_id);
                    result.specification = Some(specification);
                    return Ok(result.settled(
                        WorkflowStatus::AwaitingApproval,
                        PipelineStage::Planner,
                        "Specification ready for review. Approve to continue.",
                    ));
                }
                specification
            }
        };

        // ===== Coding =====
        if self.is_cancelled(run_id)? {
            return Ok(cancelled(result, PipelineStage::Coder));
        }
        let coder = self
            .run_agent_stage(
                run_id,
                StageKind::Coder,
                iteration,
                AgentRole::Coder,
                &coder_task(&specification, request.review_feedback.as_ref()),
            )
            .await?;
        let Some(output) = coder.output_value() else {
            return Ok(result
                .with_stage_summary(PipelineStage::Coder, stage_summary(&coder))
                .failed(PipelineStage::Coder, coder.error_message()));
        };
        let code_output = parse_code_output(&output);
        if let Err(e) = validate_code_output(&code_output) {
            warn!("Workflow {}: invalid code output: {}", run_id, e);
            return Ok(result.failed(PipelineStage::Coder, format!("Invalid code output: {}", e.message)));
        }
        let generated = code_files(&code_output);
        let mut summary = stage_summary(&coder);
        summary["files_generated"] = json!(generated.len());
        result = result.with_stage_summary(PipelineStage::Coder, summary);

        // ===== Testing =====
        if self.is_cancelled(run_id)? {
            return Ok(cancelled(result, PipelineStage::Tester));
        }
        let tester = self
            .run_agent_stage(
                run_id,
                StageKind::Tester,
                iteration,
                AgentRole::Tester,
                &tester_task(&specification, &code_output),
            )
            .await?;
        result = result.with_stage_summary(PipelineStage::Tester, stage_summary(&tester));
        let Some(output) = tester.output_value() else {
            return Ok(result.failed(PipelineStage::Tester, tester.error_message()));
        };
        let test_output = parse_test_output(&output);
        if let Err(e) = validate_test_output(&test_output) {
            warn!("Workflow {}: invalid test output: {}", run_id, e);
            return Ok(result.failed(PipelineStage::Tester, format!("Invalid test output: {}", e.message)));
        }

        let review = test_output.get("review").cloned().unwrap_or_else(|| json!({}));
        if has_blocking_issues(&review) {
            warn!("Workflow {}: blocking issues found", run_id);
            result.review = Some(review);
            result.specification = Some(specification);

            if iteration < max {
                result.can_iterate = Some(true);
                return Ok(result.settled(
                    WorkflowStatus::NeedsRefinement,
                    PipelineStage::Tester,
                    format!("Blocking issues found. Iteration {} needed.", iteration + 1),
                ));
            }
            return Ok(result.failed(
                PipelineStage::Tester,
                "Max iterations reached with unresolved blocking issues",
            ));
        }

        // ===== Completed =====
        let tests = test_files(&test_output);
        let mut artifacts: Vec<NewArtifact> = generated
            .iter()
            .map(|file| NewArtifact {
                name: file.path.clone(),
                artifact_type: ArtifactType::Code,
                content: file.content.clone(),
                metadata: json!({"description": file.description, "generated_by": "coder_agent"}),
            })
            .collect();
        artifacts.extend(tests.iter().map(|test| NewArtifact {
            name: test.file.clone(),
            artifact_type: ArtifactType::Test,
            content: test.content.clone(),
            metadata: json!({"description": test.description, "generated_by": "tester_agent"}),
        }));
        self.db.store_artifacts(
            ArtifactOwner {
                project_id,
                task_id: task_id.as_deref(),
                run_id: Some(run_id),
            },
            &artifacts,
        )?;
        info!(
            "Workflow {}: stored {} code files and {} test files",
            run_id,
            generated.len(),
            tests.len()
        );

        self.publish(
            project_id,
            WORKFLOW_COMPLETED,
            json!({
                "workflow_id": run_id,
                "iteration": iteration,
                "files_generated": generated.len(),
                "tests_generated": tests.len(),
            }),
        )
        .await;

        result.test_summary = Some(generate_test_summary(&test_output));
        result.code_files = Some(generated);
        result.test_files = Some(tests);
        result.review = Some(review);
        Ok(result.settled(
            WorkflowStatus::Completed,
            PipelineStage::Tester,
            "Workflow completed successfully!",
        ))
    }

    /// Create the run row, or flip an existing one back to `running`.
    /// Returns the linked task, if any.
    fn open_run(&self, run_id: &RunId, request: &WorkflowRequest) -> Result<Option<String>> {
        let task_id = match self.db.get_run(run_id)? {
            Some(existing) => {
                self.db.update_run_status(
                    run_id,
                    &RunUpdate {
                        status: WorkflowStatus::Running,
                        iteration: request.iteration,
                        last_stage: None,
                        last_error: None,
                    },
                )?;
                existing.task_id.or_else(|| request.task_id.clone())
            }
            None => {
                self.db.create_run(&NewRun {
                    id: run_id,
                    project_id: &request.project_id,
                    task_id: request.task_id.as_deref(),
                    original_prompt: &request.user_prompt,
                    iteration: request.iteration,
                })?;
                request.task_id.clone()
            }
        };

        if let Some(task) = &task_id {
            self.db.link_task_run(task, run_id)?;
            self.db.set_task_status(task, TaskStatus::Running)?;
        }
        Ok(task_id)
    }

    fn is_cancelled(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.registry.is_cancelled(run_id) || self.db.is_canceled(run_id)?)
    }

    /// begin → invoke → complete. Agent failures come back inside the
    /// `AgentResult`; only storage errors are `Err`.
    async fn run_agent_stage(
        &self,
        run_id: &RunId,
        kind: StageKind,
        iteration: u32,
        role: AgentRole,
        task: &str,
    ) -> Result<AgentResult> {
        let stage_id = self.db.begin_stage(run_id, kind, iteration)?;
        info!("Workflow {}: running {} agent", run_id, role);

        let agent = self
            .invoker
            .invoke_for_run(run_id, &RoleConfig::for_role(role), task)
            .await;

        let (status, output) = match agent.output_value() {
            Some(output) => (StageStatus::Completed, output),
            None => (StageStatus::Failed, json!({"error": agent.error_message()})),
        };
        self.db.complete_stage(&stage_id, status, Some(&output))?;
        Ok(agent)
    }

    /// Record the outcome on the run and its task, then notify.
    async fn finish(&self, run_id: &RunId, result: &WorkflowResult) {
        log_filter_warn(
            self.db.update_run_status(
                run_id,
                &RunUpdate {
                    status: result.status,
                    iteration: result.iteration,
                    last_stage: Some(result.stage.as_str()),
                    last_error: result.error.as_deref(),
                },
            ),
            "Failed to record run outcome",
        );

        let task_id = self
            .db
            .get_run(run_id)
            .ok()
            .flatten()
            .and_then(|run| run.task_id);
        if let Some(task) = task_id {
            let status = match result.status {
                WorkflowStatus::Completed => TaskStatus::Completed,
                WorkflowStatus::Failed if self.is_cancelled(run_id).unwrap_or(false) => {
                    TaskStatus::Cancelled
                }
                WorkflowStatus::Failed => TaskStatus::Failed,
                _ => TaskStatus::Running,
            };
            log_filter_warn(
                self.db.set_task_status(&task, status),
                "Failed to update task status",
            );
        }

        let event_type = match result.status {
            WorkflowStatus::AwaitingApproval => WORKFLOW_AWAITING_APPROVAL,
            WorkflowStatus::NeedsRefinement => WORKFLOW_NEEDS_REFINEMENT,
            WorkflowStatus::Failed => WORKFLOW_FAILED,
            // Completion is published with its counts once artifacts are stored
            WorkflowStatus::Completed | WorkflowStatus::Running => return,
        };
        self.publish(
            &result.project_id,
            event_type,
            json!({
                "workflow_id": run_id,
                "iteration": result.iteration,
                "stage": result.stage,
                "error": result.error,
            }),
        )
        .await;
    }

    async fn publish(&self, project_id: &str, event_type: &str, payload: Value) {
        if let Err(e) = self.events.publish_event(project_id, event_type, payload).await {
            warn!("Failed to publish {} event: {}", event_type, e);
        }
    }
}

fn cancelled(result: WorkflowResult, stage: PipelineStage) -> WorkflowResult {
    info!("Workflow {}: cancelled before {}", result.workflow_id, stage);
    result.failed(stage, format!("Workflow cancelled before {} stage", stage))
}

fn stage_summary(agent: &AgentResult) -> Value {
    let mut summary = json!({
        "status": agent.status,
        "simulation": agent.simulation,
        "duration_ms": agent.duration_ms,
    });
    if let Some(error) = &agent.error {
        summary["error"] = json!(error);
    }
    summary
}
