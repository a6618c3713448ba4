//! Critic/Integration Loop
//!
//! Reviews a finished implementation and either integrates it, asks for
//! changes (bounded by `max_critic_iterations` per pass), or escalates to a
//! human. A review that cannot be obtained at all auto-approves, flagged
//! `degraded`.
//!
//! Iteration numbers continue across passes: reviewing a run again after a
//! rejection or exhaustion starts after the last recorded iteration.
//!
//! Approved work goes through the integrator role, whose package is checked
//! with [`validate_package`]. When packaging fails the reviewed files are
//! integrated as they are and the report is marked `degraded`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::events::{CRITIC_APPROVED, CRITIC_DEGRADED, CRITIC_ESCALATED, SharedPublisher};
use super::registry::SharedRegistry;
use crate::agent::prompt::{critic_task, integrator_task, refine_task};
use crate::agent::{AUDIT_TARGET, AgentInvoker, AgentRole, RoleConfig};
use crate::constants::workflow::DEFAULT_MAX_CRITIC_ITERATIONS;
use crate::parser::{
    CriticStatus, code_files, decode_json, parse_code_output, parse_critic_verdict,
    validate_code_output, validate_package,
};
use crate::storage::{
    ArtifactOwner, ArtifactType, NewArtifact, NewCriticFeedback, SharedDatabase, StageKind,
    StageStatus, TaskStatus,
};
use crate::types::{FlowError, Result, RunId, log_filter_warn};

// =============================================================================
// Refiners
// =============================================================================

/// Produces the next implementation after `changes_requested`
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, run_id: &RunId, implementation: &Value, feedback: &str) -> Value;
}

/// Asks the coder role for a revised file list
pub struct AgentRefiner {
    invoker: AgentInvoker,
}

impl AgentRefiner {
    pub fn new(invoker: AgentInvoker) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Refiner for AgentRefiner {
    async fn refine(&self, run_id: &RunId, implementation: &Value, feedback: &str) -> Value {
        let result = self
            .invoker
            .invoke_for_run(
                run_id,
                &RoleConfig::for_role(AgentRole::Coder),
                &refine_task(implementation, feedback),
            )
            .await;

        let Some(output) = result.output_value() else {
            warn!(
                "Refinement failed for run {}, keeping current implementation: {}",
                run_id,
                result.error_message()
            );
            return implementation.clone();
        };

        let revised = parse_code_output(&output);
        match validate_code_output(&revised) {
            Ok(()) => revised,
            Err(e) => {
                warn!("Refinement for run {} was unusable: {}", run_id, e);
                implementation.clone()
            }
        }
    }
}

/// Leaves the implementation unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRefiner;

#[async_trait]
impl Refiner for PassthroughRefiner {
    async fn refine(&self, _run_id: &RunId, implementation: &Value, _feedback: &str) -> Value {
        implementation.clone()
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriticResolution {
    Approved { iteration: u32 },
    Rejected { iteration: u32, feedback: String },
    Exhausted { iterations: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct CriticReport {
    pub resolution: CriticResolution,
    /// Reviews performed in this pass
    pub iterations: u32,
    /// Approved without a usable review, or integrated without a usable package
    pub degraded: bool,
    /// Feedback of every iteration in this pass, oldest first
    pub feedback: Vec<String>,
    /// Ids of the integrated artifacts (approved only)
    pub artifact_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_instructions: Option<String>,
}

impl CriticReport {
    fn unresolved(resolution: CriticResolution, iterations: u32, feedback: Vec<String>) -> Self {
        Self {
            resolution,
            iterations,
            degraded: false,
            feedback,
            artifact_ids: Vec::new(),
            deployment_instructions: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self.resolution, CriticResolution::Approved { .. })
    }

    /// Rejection and exhaustion become distinct errors
    pub fn into_result(self) -> Result<Self> {
        match self.resolution {
            CriticResolution::Approved { .. } => Ok(self),
            CriticResolution::Rejected { iteration, feedback } => {
                Err(FlowError::CriticRejected { iteration, feedback })
            }
            CriticResolution::Exhausted { iterations } => {
                Err(FlowError::CriticExhausted { iterations })
            }
        }
    }
}

// =============================================================================
// Loop
// =============================================================================

pub struct CriticLoop {
    db: SharedDatabase,
    invoker: AgentInvoker,
    events: SharedPublisher,
    registry: SharedRegistry,
    refiner: Arc<dyn Refiner>,
    max_iterations: u32,
}

/// Where the implementation under review lives
#[derive(Debug, Clone, Copy)]
pub struct ReviewTarget<'a> {
    pub project_id: &'a str,
    pub run_id: &'a RunId,
    pub task_id: Option<&'a str>,
}

/// Stored outcome of integrating approved work
struct Integration {
    artifact_ids: Vec<String>,
    degraded: bool,
    deployment_instructions: Option<String>,
}

impl CriticLoop {
    pub fn new(
        db: SharedDatabase,
        invoker: AgentInvoker,
        events: SharedPublisher,
        registry: SharedRegistry,
    ) -> Self {
        let refiner: Arc<dyn Refiner> = Arc::new(AgentRefiner::new(invoker.clone()));
        Self {
            db,
            invoker,
            events,
            registry,
            refiner,
            max_iterations: DEFAULT_MAX_CRITIC_ITERATIONS,
        }
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn Refiner>) -> Self {
        self.refiner = refiner;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Review `implementation` (`{files: [...]}`) until it settles.
    ///
    /// Storage failures and cancellation are `Err`; every review outcome,
    /// including rejection, is a report.
    #[instrument(skip(self, implementation), fields(run_id = %target.run_id))]
    pub async fn run(&self, target: ReviewTarget<'_>, implementation: Value) -> Result<CriticReport> {
        let run_id = target.run_id;
        let mut implementation = implementation;
        let mut history = Vec::new();

        let first = self.db.last_critic_iteration(run_id)? + 1;
        let last = first + self.max_iterations - 1;
        if first > 1 {
            info!("Run {} resumes critic review at iteration {}", run_id, first);
        }

        for iteration in first..=last {
            let reviewed = iteration - first + 1;
            if self.registry.is_cancelled(run_id) || self.db.is_canceled(run_id)? {
                return Err(FlowError::Cancelled {
                    run_id: run_id.to_string(),
                });
            }

            let stage_id = self.db.begin_stage(run_id, StageKind::Critic, iteration)?;
            let result = self
                .invoker
                .invoke_for_run(
                    run_id,
                    &RoleConfig::for_role(AgentRole::Critic),
                    &critic_task(&implementation),
                )
                .await;

            let verdict = match result.output_value() {
                Some(output) => parse_critic_verdict(&output).map_err(|e| e.to_string()),
                None => Err(result.error_message().to_string()),
            };

            let verdict = match verdict {
                Ok(verdict) => verdict,
                Err(reason) => {
                    let feedback = format!(
                        "Critic review unavailable ({}); auto-approved without review",
                        reason
                    );
                    self.db.complete_stage(
                        &stage_id,
                        StageStatus::Failed,
                        Some(&json!({"error": reason, "degraded": true})),
                    )?;
                    self.db.record_critic_feedback(&NewCriticFeedback {
                        run_id,
                        stage_id: Some(&stage_id),
                        iteration,
                        status: CriticStatus::Approved,
                        feedback: &feedback,
                        degraded: true,
                    })?;
                    warn!(
                        target: AUDIT_TARGET,
                        run_id = run_id.as_str(),
                        iteration,
                        degraded = true,
                        "critic auto-approval: {}",
                        reason
                    );
                    self.publish(
                        target.project_id,
                        CRITIC_DEGRADED,
                        json!({"workflow_id": run_id, "iteration": iteration, "reason": reason}),
                    )
                    .await;

                    history.push(feedback);
                    let integration = self.integrate(target, &implementation).await?;
                    return Ok(CriticReport {
                        resolution: CriticResolution::Approved { iteration },
                        iterations: reviewed,
                        degraded: true,
                        feedback: history,
                        artifact_ids: integration.artifact_ids,
                        deployment_instructions: integration.deployment_instructions,
                    });
                }
            };

            self.db.complete_stage(
                &stage_id,
                StageStatus::Completed,
                Some(&json!({"status": verdict.status, "feedback": verdict.feedback})),
            )?;
            self.db.record_critic_feedback(&NewCriticFeedback {
                run_id,
                stage_id: Some(&stage_id),
                iteration,
                status: verdict.status,
                feedback: &verdict.feedback,
                degraded: false,
            })?;
            info!(
                "Critic iteration {} for run {}: {}",
                iteration, run_id, verdict.status
            );
            history.push(verdict.feedback.clone());

            match verdict.status {
                CriticStatus::Approved => {
                    let integration = self.integrate(target, &implementation).await?;
                    self.publish(
                        target.project_id,
                        CRITIC_APPROVED,
                        json!({
                            "workflow_id": run_id,
                            "iteration": iteration,
                            "files_integrated": integration.artifact_ids.len(),
                        }),
                    )
                    .await;
                    return Ok(CriticReport {
                        resolution: CriticResolution::Approved { iteration },
                        iterations: reviewed,
                        degraded: integration.degraded,
                        feedback: history,
                        artifact_ids: integration.artifact_ids,
                        deployment_instructions: integration.deployment_instructions,
                    });
                }
                CriticStatus::Rejected => {
                    self.escalate(target, iteration, "rejected", &verdict.feedback)
                        .await;
                    return Ok(CriticReport::unresolved(
                        CriticResolution::Rejected {
                            iteration,
                            feedback: verdict.feedback,
                        },
                        reviewed,
                        history,
                    ));
                }
                CriticStatus::ChangesRequested => {
                    if iteration < last {
                        implementation = self
                            .refiner
                            .refine(run_id, &implementation, &verdict.feedback)
                            .await;
                    }
                }
            }
        }

        let iterations = self.max_iterations;
        let last_feedback = history.last().cloned().unwrap_or_default();
        self.escalate(target, last, "exhausted", &last_feedback).await;
        Ok(CriticReport::unresolved(
            CriticResolution::Exhausted { iterations },
            iterations,
            history,
        ))
    }

    /// Package the approved files with the integrator role and store the result.
    async fn integrate(&self, target: ReviewTarget<'_>, implementation: &Value) -> Result<Integration> {
        let run_id = target.run_id;
        let result = self
            .invoker
            .invoke_for_run(
                run_id,
                &RoleConfig::for_role(AgentRole::Integrator),
                &integrator_task(implementation),
            )
            .await;

        let packaged = match result.output_value() {
            Some(output) => read_package(output),
            None => Err(result.error_message().to_string()),
        };

        let (files, generated_by, degraded, deployment_instructions) = match packaged {
            Ok((package, instructions)) => (code_files(&package), "integrator", false, instructions),
            Err(reason) => {
                warn!(
                    "Packaging failed for run {}, integrating reviewed files: {}",
                    run_id, reason
                );
                self.publish(
                    target.project_id,
                    CRITIC_DEGRADED,
                    json!({"workflow_id": run_id, "stage": "integration", "reason": reason}),
                )
                .await;
                (code_files(implementation), "reviewed", true, None)
            }
        };

        let artifacts: Vec<NewArtifact> = files
            .into_iter()
            .map(|file| NewArtifact {
                name: file.path,
                artifact_type: ArtifactType::File,
                content: file.content,
                metadata: json!({"description": file.description, "generated_by": generated_by}),
            })
            .collect();

        let artifact_ids = self.db.store_artifacts(
            ArtifactOwner {
                project_id: target.project_id,
                task_id: target.task_id,
                run_id: Some(run_id),
            },
            &artifacts,
        )?;

        Ok(Integration {
            artifact_ids,
            degraded,
            deployment_instructions,
        })
    }

    async fn escalate(&self, target: ReviewTarget<'_>, iteration: u32, reason: &str, feedback: &str) {
        warn!(
            "Critic escalated run {} at iteration {} ({})",
            target.run_id, iteration, reason
        );
        if let Some(task) = target.task_id {
            log_filter_warn(
                self.db.set_task_status(task, TaskStatus::Blocked),
                "Failed to block task",
            );
        }
        self.publish(
            target.project_id,
            CRITIC_ESCALATED,
            json!({
                "workflow_id": target.run_id,
                "iteration": iteration,
                "reason": reason,
                "feedback": feedback,
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

/// Integrator output is `{package: {files}, deployment_instructions}`; a bare
/// `{files}` is accepted as the package itself.
fn read_package(output: Value) -> std::result::Result<(Value, Option<String>), String> {
    let output = match output {
        Value::String(text) => decode_json(&text).unwrap_or(Value::String(text)),
        other => other,
    };
    let instructions = output
        .get("deployment_instructions")
        .and_then(Value::as_str)
        .map(str::to_string);
    let package = output.get("package").cloned().unwrap_or(output);

    validate_package(&package).map_err(|e| e.message)?;
    Ok((package, instructions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SimulatedProvider;
    use crate::storage::{NewRun, WorkflowStatus};
    use crate::workflow::testing::{Harness, ScriptedCapability};

    fn implementation() -> Value {
        json!({"files": [
            {"path": "main.py", "content": "print('hi')", "description": "entry"},
            {"path": "util.py", "content": "pass"},
        ]})
    }

    fn setup(harness: &Harness) -> (RunId, String) {
        let run_id = RunId::generate();
        harness
            .db
            .create_run(&NewRun {
                id: &run_id,
                project_id: "proj",
                task_id: None,
                original_prompt: "prompt",
                iteration: 1,
            })
            .unwrap();
        let task_id = harness.db.create_task("proj", "Review").unwrap();
        (run_id, task_id)
    }

    fn target<'a>(run_id: &'a RunId, task_id: &'a str) -> ReviewTarget<'a> {
        ReviewTarget {
            project_id: "proj",
            run_id,
            task_id: Some(task_id),
        }
    }

    fn verdict(status: &str, feedback: &str) -> Value {
        json!({"status": status, "feedback": feedback})
    }

    #[tokio::test]
    async fn test_approved_first_iteration_integrates() {
        let harness = Harness::new();
        let capability = ScriptedCapability::new(|role, _, task| match role {
            AgentRole::Critic => Ok(verdict("approved", "ship it")),
            other => Ok(SimulatedProvider::output_for(other, task)),
        });
        let critic = harness.critic(capability.clone());
        let (run_id, task_id) = setup(&harness);

        let report = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();

        assert_eq!(report.resolution, CriticResolution::Approved { iteration: 1 });
        assert!(!report.degraded);
        assert_eq!(report.artifact_ids.len(), 3);
        assert!(report.deployment_instructions.is_some());
        assert_eq!(capability.calls(AgentRole::Integrator), 1);
        assert!(
            capability
                .last_task(AgentRole::Integrator)
                .unwrap()
                .contains("print('hi')")
        );

        let artifacts = harness.db.artifacts_for_run(&run_id).unwrap();
        assert!(artifacts.iter().all(|a| a.artifact_type == ArtifactType::File));
        assert!(artifacts.iter().all(|a| a.metadata["generated_by"] == "integrator"));
        assert!(artifacts.iter().any(|a| a.name == "requirements.txt"));

        let feedback = harness.db.critic_feedback_for_run(&run_id).unwrap();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].status, CriticStatus::Approved);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_rejection_is_final_and_blocks_task() {
        let harness = Harness::new();
        let capability =
            ScriptedCapability::new(|_, _, _| Ok(verdict("rejected", "fundamentally insecure")));
        let critic = harness.critic(capability.clone());
        let (run_id, task_id) = setup(&harness);

        let report = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(capability.calls(AgentRole::Critic), 1);
        assert_eq!(
            harness.db.get_task(&task_id).unwrap().unwrap().status,
            TaskStatus::Blocked
        );
        assert!(harness.db.artifacts_for_run(&run_id).unwrap().is_empty());

        let events = harness.bus.recent_events("proj", 5).unwrap();
        assert_eq!(events[0].event_type, CRITIC_ESCALATED);
        assert_eq!(events[0].payload["reason"], "rejected");

        match report.into_result() {
            Err(FlowError::CriticRejected { iteration, feedback }) => {
                assert_eq!(iteration, 1);
                assert_eq!(feedback, "fundamentally insecure");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_changes_requested_until_exhausted() {
        let harness = Harness::new();
        let capability = ScriptedCapability::new(|role, _, _| match role {
            AgentRole::Critic => Ok(verdict("changes_requested", "add input validation")),
            _ => Ok(json!({"files": [{"path": "main.py", "content": "revised"}]})),
        });
        let critic = harness.critic(capability.clone()).with_max_iterations(3);
        let (run_id, task_id) = setup(&harness);

        let report = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();

        assert_eq!(report.resolution, CriticResolution::Exhausted { iterations: 3 });
        assert_eq!(capability.calls(AgentRole::Critic), 3);
        // No refinement after the last review
        assert_eq!(capability.calls(AgentRole::Coder), 2);
        assert!(capability.last_task(AgentRole::Critic).unwrap().contains("revised"));

        let iterations: Vec<u32> = harness
            .db
            .critic_feedback_for_run(&run_id)
            .unwrap()
            .iter()
            .map(|f| f.iteration)
            .collect();
        assert_eq!(iterations, vec![1, 2, 3]);
        assert_eq!(
            harness.db.get_task(&task_id).unwrap().unwrap().status,
            TaskStatus::Blocked
        );
        assert!(matches!(
            report.into_result(),
            Err(FlowError::CriticExhausted { iterations: 3 })
        ));
    }

    #[tokio::test]
    async fn test_changes_then_approval() {
        let harness = Harness::new();
        let capability = ScriptedCapability::new(|role, call, _| match (role, call) {
            (AgentRole::Critic, 1) => Ok(verdict("changes_requested", "rename module")),
            (AgentRole::Critic, _) => Ok(verdict("approved", "good")),
            _ => Ok(json!({"files": [{"path": "app.py", "content": "renamed"}]})),
        });
        let critic = harness.critic(capability);
        let (run_id, task_id) = setup(&harness);

        let report = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();

        assert_eq!(report.resolution, CriticResolution::Approved { iteration: 2 });
        assert!(!report.degraded);
        assert_eq!(report.feedback, vec!["rename module", "good"]);
        let names: Vec<String> = harness
            .db
            .artifacts_for_run(&run_id)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["app.py"]);
    }

    #[tokio::test]
    async fn test_review_error_auto_approves_degraded() {
        let harness = Harness::new();
        let capability = ScriptedCapability::new(|_, _, _| Ok(json!("not json at all")));
        let critic = harness.critic(capability);
        let (run_id, task_id) = setup(&harness);

        let report = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();

        assert!(report.degraded);
        assert!(report.is_approved());
        assert!(report.feedback[0].starts_with("Critic review unavailable ("));
        assert!(report.feedback[0].ends_with("auto-approved without review"));

        let feedback = harness.db.critic_feedback_for_run(&run_id).unwrap();
        assert!(feedback[0].degraded);
        let stage = harness
            .db
            .latest_stage_of_type(&run_id, StageKind::Critic)
            .unwrap()
            .unwrap();
        assert_eq!(stage.status, StageStatus::Failed);

        let events = harness.bus.recent_events("proj", 5).unwrap();
        assert!(events.iter().any(|e| e.event_type == CRITIC_DEGRADED));
    }

    #[tokio::test]
    async fn test_unusable_package_integrates_reviewed_files() {
        let harness = Harness::new();
        let capability = ScriptedCapability::new(|role, _, _| match role {
            AgentRole::Critic => Ok(verdict("approved", "fine")),
            _ => Ok(json!({"package": {"files": []}})),
        });
        let critic = harness.critic(capability);
        let (run_id, task_id) = setup(&harness);

        let report = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();

        assert!(report.is_approved());
        assert!(report.degraded);
        assert!(report.deployment_instructions.is_none());

        let artifacts = harness.db.artifacts_for_run(&run_id).unwrap();
        let mut names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["main.py", "util.py"]);
        assert!(artifacts.iter().all(|a| a.metadata["generated_by"] == "reviewed"));

        // Only the packaging fell back; the review itself was recorded normally
        let feedback = harness.db.critic_feedback_for_run(&run_id).unwrap();
        assert!(!feedback[0].degraded);

        let events = harness.bus.recent_events("proj", 5).unwrap();
        let degraded = events
            .iter()
            .find(|e| e.event_type == CRITIC_DEGRADED)
            .unwrap();
        assert_eq!(degraded.payload["stage"], "integration");
        assert_eq!(degraded.payload["reason"], "Package must contain at least one file");
    }

    #[tokio::test]
    async fn test_second_review_continues_iteration_numbers() {
        let harness = Harness::new();
        let capability = ScriptedCapability::new(|role, call, task| match (role, call) {
            (AgentRole::Critic, 1) => Ok(verdict("rejected", "no input validation")),
            (AgentRole::Critic, _) => Ok(verdict("approved", "validation added")),
            (other, _) => Ok(SimulatedProvider::output_for(other, task)),
        });
        let critic = harness.critic(capability.clone());
        let (run_id, task_id) = setup(&harness);

        let first = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();
        assert_eq!(
            first.resolution,
            CriticResolution::Rejected {
                iteration: 1,
                feedback: "no input validation".to_string()
            }
        );

        let second = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap();
        assert_eq!(second.resolution, CriticResolution::Approved { iteration: 2 });
        assert_eq!(second.iterations, 1);
        assert_eq!(second.feedback, vec!["validation added"]);
        assert_eq!(capability.calls(AgentRole::Critic), 2);

        let iterations: Vec<u32> = harness
            .db
            .critic_feedback_for_run(&run_id)
            .unwrap()
            .iter()
            .map(|f| f.iteration)
            .collect();
        assert_eq!(iterations, vec![1, 2]);
        assert!(!harness.db.artifacts_for_run(&run_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_run_gets_a_fresh_budget() {
        let harness = Harness::new();
        let capability = ScriptedCapability::new(|role, _, _| match role {
            AgentRole::Critic => Ok(verdict("changes_requested", "split the module")),
            _ => Ok(json!({"files": [{"path": "main.py", "content": "split"}]})),
        });
        let critic = harness.critic(capability.clone()).with_max_iterations(2);
        let (run_id, task_id) = setup(&harness);

        for _ in 0..2 {
            let report = critic
                .run(target(&run_id, &task_id), implementation())
                .await
                .unwrap();
            assert_eq!(report.resolution, CriticResolution::Exhausted { iterations: 2 });
        }

        assert_eq!(capability.calls(AgentRole::Critic), 4);
        let iterations: Vec<u32> = harness
            .db
            .critic_feedback_for_run(&run_id)
            .unwrap()
            .iter()
            .map(|f| f.iteration)
            .collect();
        assert_eq!(iterations, vec![1, 2, 3, 4]);

        let events = harness.bus.recent_events("proj", 1).unwrap();
        assert_eq!(events[0].payload["iteration"], 4);
    }

    #[tokio::test]
    async fn test_passthrough_refiner_and_cancellation() {
        let harness = Harness::new();
        let capability =
            ScriptedCapability::new(|_, _, _| Ok(verdict("changes_requested", "again")));
        let critic = harness
            .critic(capability.clone())
            .with_refiner(Arc::new(PassthroughRefiner));
        let (run_id, task_id) = setup(&harness);
        assert!(harness.db.request_cancel(&run_id).unwrap());

        let err = critic
            .run(target(&run_id, &task_id), implementation())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Cancelled { .. }));
        assert_eq!(capability.calls(AgentRole::Critic), 0);
        assert_eq!(
            harness.db.require_run(&run_id).unwrap().status,
            WorkflowStatus::Running
        );
    }
}
