//! Workflow runs, their tasks, and critic feedback.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::database::{Database, json_column, now_rfc3339};
use crate::parser::CriticStatus;
use crate::types::{FlowError, Result, ResultExt, RunId, StageId};

// =============================================================================
// Run Status
// =============================================================================

/// Run status, also reported as `WorkflowResult::status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    /// Suspended until a specification is approved
    AwaitingApproval,
    NeedsRefinement,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::NeedsRefinement => "needs_refinement",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "needs_refinement" => Ok(Self::NeedsRefinement),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(FlowError::Storage(format!("Unknown run status: {}", other))),
        }
    }
}

// =============================================================================
// Runs
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: RunId,
    pub project_id: String,
    pub task_id: Option<String>,
    pub iteration: u32,
    pub status: WorkflowStatus,
    pub original_prompt: String,
    pub enhanced_prompt: Option<String>,
    pub specification: Option<Value>,
    pub approved_specification: Option<Value>,
    pub validation_score: Option<u8>,
    pub last_stage: Option<String>,
    pub last_error: Option<String>,
    pub canceled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Values for a new `running` run
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub id: &'a RunId,
    pub project_id: &'a str,
    pub task_id: Option<&'a str>,
    pub original_prompt: &'a str,
    pub iteration: u32,
}

/// Status transition recorded after each pipeline outcome
#[derive(Debug, Clone)]
pub struct RunUpdate<'a> {
    pub status: WorkflowStatus,
    pub iteration: u32,
    pub last_stage: Option<&'a str>,
    pub last_error: Option<&'a str>,
}

const RUN_COLUMNS: &str = "id, project_id, task_id, iteration, status, original_prompt,
    enhanced_prompt, specification, approved_specification, validation_score,
    last_stage, last_error, canceled, created_at, updated_at";

struct RunRow {
    id: String,
    project_id: String,
    task_id: Option<String>,
    iteration: i64,
    status: String,
    original_prompt: String,
    enhanced_prompt: Option<String>,
    specification: Option<String>,
    approved_specification: Option<String>,
    validation_score: Option<i64>,
    last_stage: Option<String>,
    last_error: Option<String>,
    canceled: bool,
    created_at: String,
    updated_at: String,
}

fn map_run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        task_id: row.get(2)?,
        iteration: row.get(3)?,
        status: row.get(4)?,
        original_prompt: row.get(5)?,
        enhanced_prompt: row.get(6)?,
        specification: row.get(7)?,
        approved_specification: row.get(8)?,
        validation_score: row.get(9)?,
        last_stage: row.get(10)?,
        last_error: row.get(11)?,
        canceled: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord> {
        Ok(RunRecord {
            status: self.status.parse()?,
            specification: json_column(self.specification, "specification")?,
            approved_specification: json_column(
                self.approved_specification,
                "approved specification",
            )?,
            id: RunId::new(self.id),
            project_id: self.project_id,
            task_id: self.task_id,
            iteration: self.iteration as u32,
            original_prompt: self.original_prompt,
            enhanced_prompt: self.enhanced_prompt,
            validation_score: self.validation_score.map(|s| s.clamp(0, 100) as u8),
            last_stage: self.last_stage,
            last_error: self.last_error,
            canceled: self.canceled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl Database {
    pub fn create_run(&self, run: &NewRun<'_>) -> Result<()> {
        let now = now_rfc3339();
        self.conn()?
            .execute(
                "INSERT INTO workflow_runs
                 (id, project_id, task_id, iteration, status, original_prompt, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?6, ?6)",
                params![
                    run.id.as_str(),
                    run.project_id,
                    run.task_id,
                    run.iteration,
                    run.original_prompt,
                    now
                ],
            )
            .with_context("Failed to create run")?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM workflow_runs WHERE id = ?1", RUN_COLUMNS);
        conn.query_row(&sql, params![run_id.as_str()], map_run_row)
            .optional()
            .with_context("Failed to load run")?
            .map(RunRow::into_record)
            .transpose()
    }

    /// Like `get_run`, but a missing run is `NotFound`
    pub fn require_run(&self, run_id: &RunId) -> Result<RunRecord> {
        self.get_run(run_id)?
            .ok_or_else(|| FlowError::not_found("Run", run_id.as_str()))
    }

    /// Newest first, optionally limited to one project
    pub fn recent_runs(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM workflow_runs
             WHERE (?1 IS NULL OR project_id = ?1)
             ORDER BY created_at DESC LIMIT ?2",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).with_context("Failed to prepare runs query")?;
        let rows = stmt
            .query_map(params![project_id, limit as i64], map_run_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch runs")?;

        rows.into_iter().map(RunRow::into_record).collect()
    }

    pub fn update_run_status(&self, run_id: &RunId, update: &RunUpdate<'_>) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE workflow_runs
                 SET status = ?2, iteration = ?3, last_stage = ?4, last_error = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    run_id.as_str(),
                    update.status.as_str(),
                    update.iteration,
                    update.last_stage,
                    update.last_error,
                    now_rfc3339()
                ],
            )
            .with_context("Failed to update run status")?;

        if updated == 0 {
            return Err(FlowError::not_found("Run", run_id.as_str()));
        }
        Ok(())
    }

    pub fn store_run_prompt(
        &self,
        run_id: &RunId,
        enhanced_prompt: &str,
        validation_score: u8,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE workflow_runs SET enhanced_prompt = ?2, validation_score = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![run_id.as_str(), enhanced_prompt, validation_score, now_rfc3339()],
            )
            .with_context("Failed to store enhanced prompt")?;
        Ok(())
    }

    pub fn store_specification(&self, run_id: &RunId, specification: &Value) -> Result<()> {
        let text = serde_json::to_string(specification)?;
        self.conn()?
            .execute(
                "UPDATE workflow_runs SET specification = ?2, updated_at = ?3 WHERE id = ?1",
                params![run_id.as_str(), text, now_rfc3339()],
            )
            .with_context("Failed to store specification")?;
        Ok(())
    }

    /// A run holds at most one approved specification; approving again replaces it.
    pub fn store_approved_specification(&self, run_id: &RunId, specification: &Value) -> Result<()> {
        let text = serde_json::to_string(specification)?;
        self.conn()?
            .execute(
                "UPDATE workflow_runs SET approved_specification = ?2, updated_at = ?3 WHERE id = ?1",
                params![run_id.as_str(), text, now_rfc3339()],
            )
            .with_context("Failed to store approved specification")?;
        Ok(())
    }

    /// Flag a run for cancellation. Returns false for unknown or finished runs.
    pub fn request_cancel(&self, run_id: &RunId) -> Result<bool> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE workflow_runs SET canceled = 1, updated_at = ?2
                 WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
                params![run_id.as_str(), now_rfc3339()],
            )
            .with_context("Failed to request cancellation")?;
        Ok(updated == 1)
    }

    pub fn is_canceled(&self, run_id: &RunId) -> Result<bool> {
        let canceled: Option<bool> = self
            .conn()?
            .query_row(
                "SELECT canceled FROM workflow_runs WHERE id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to read cancellation flag")?;
        Ok(canceled.unwrap_or(false))
    }

    /// Fail a run only if it is still `running`; returns whether it changed.
    pub fn fail_run_if_running(&self, run_id: &RunId, stage: &str, error: &str) -> Result<bool> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE workflow_runs
                 SET status = 'failed', last_stage = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'running'",
                params![run_id.as_str(), stage, error, now_rfc3339()],
            )
            .with_context("Failed to fail run")?;
        Ok(updated == 1)
    }
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Needs a human decision (critic rejection or exhaustion)
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(FlowError::Storage(format!("Unknown task status: {}", other))),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub run_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Database {
    /// Create a `queued` task; returns its id
    pub fn create_task(&self, project_id: &str, title: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn()?
            .execute(
                "INSERT INTO tasks (id, project_id, title, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'queued', ?4, ?4)",
                params![id, project_id, title, now],
            )
            .with_context("Failed to create task")?;
        Ok(id)
    }

    pub fn link_task_run(&self, task_id: &str, run_id: &RunId) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE tasks SET run_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![task_id, run_id.as_str(), now_rfc3339()],
            )
            .with_context("Failed to link task to run")?;
        Ok(())
    }

    pub fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![task_id, status.as_str(), now_rfc3339()],
            )
            .with_context("Failed to update task status")?;
        if updated == 0 {
            return Err(FlowError::not_found("Task", task_id));
        }
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, project_id, title, status, run_id, created_at, updated_at
                 FROM tasks WHERE id = ?1",
                params![task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .with_context("Failed to load task")?;

        row.map(
            |(id, project_id, title, status, run_id, created_at, updated_at)| -> Result<TaskRecord> {
                Ok(TaskRecord {
                    status: status.parse()?,
                    id,
                    project_id,
                    title,
                    run_id,
                    created_at,
                    updated_at,
                })
            },
        )
        .transpose()
    }
}

// =============================================================================
// Critic Feedback
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CriticFeedbackRecord {
    pub id: String,
    pub run_id: RunId,
    pub stage_id: Option<StageId>,
    pub iteration: u32,
    pub status: CriticStatus,
    pub feedback: String,
    /// Auto-approved because the review itself failed
    pub degraded: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewCriticFeedback<'a> {
    pub run_id: &'a RunId,
    pub stage_id: Option<&'a StageId>,
    pub iteration: u32,
    pub status: CriticStatus,
    pub feedback: &'a str,
    pub degraded: bool,
}

impl Database {
    /// Iterations must strictly increase per run.
    pub fn record_critic_feedback(&self, entry: &NewCriticFeedback<'_>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let inserted = self
            .conn()?
            .execute(
                "INSERT INTO critic_feedback
                 (id, run_id, stage_id, iteration, status, feedback, degraded, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 WHERE ?4 > (SELECT COALESCE(MAX(iteration), 0) FROM critic_feedback WHERE run_id = ?2)",
                params![
                    id,
                    entry.run_id.as_str(),
                    entry.stage_id.map(StageId::as_str),
                    entry.iteration,
                    entry.status.as_str(),
                    entry.feedback,
                    entry.degraded,
                    now_rfc3339()
                ],
            )
            .with_context("Failed to record critic feedback")?;

        if inserted == 0 {
            return Err(FlowError::StageState(format!(
                "Critic iteration {} for run {} is not after the last recorded iteration",
                entry.iteration, entry.run_id
            )));
        }
        Ok(id)
    }

    /// Highest recorded critic iteration for a run, 0 when it was never reviewed
    pub fn last_critic_iteration(&self, run_id: &RunId) -> Result<u32> {
        let last: i64 = self
            .conn()?
            .query_row(
                "SELECT COALESCE(MAX(iteration), 0) FROM critic_feedback WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .with_context("Failed to read last critic iteration")?;
        Ok(last as u32)
    }

    /// Oldest iteration first
    pub fn critic_feedback_for_run(&self, run_id: &RunId) -> Result<Vec<CriticFeedbackRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, stage_id, iteration, status, feedback, degraded, created_at
                 FROM critic_feedback WHERE run_id = ?1 ORDER BY iteration",
            )
            .with_context("Failed to prepare critic feedback query")?;

        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch critic feedback")?;

        rows.into_iter()
            .map(
                |(id, run_id, stage_id, iteration, status, feedback, degraded, created_at)|
                 -> Result<CriticFeedbackRecord> {
                    Ok(CriticFeedbackRecord {
                        status: status.parse::<CriticStatus>()?,
                        id,
                        run_id: RunId::new(run_id),
                        stage_id: stage_id.map(StageId::new),
                        iteration: iteration as u32,
                        feedback,
                        degraded,
                        created_at,
                    })
                },
            )
            .collect()
    }
}
