//! Stage Record Store
//!
//! A stage is inserted `active` before its agent runs and updated exactly
//! once to a terminal status afterwards. Terminal stages are immutable and
//! never deleted; `completed_at` is set iff the status is terminal.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::database::{Database, json_column, now_rfc3339};
use crate::types::{FlowError, Result, ResultExt, RunId, StageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Planner,
    Coder,
    Tester,
    Critic,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [Self::Planner, Self::Coder, Self::Tester, Self::Critic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Critic => "critic",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "planner" => Ok(Self::Planner),
            "coder" => Ok(Self::Coder),
            "tester" => Ok(Self::Tester),
            "critic" => Ok(Self::Critic),
            other => Err(FlowError::Storage(format!("Unknown stage type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Active,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(FlowError::Storage(format!("Unknown stage status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub id: StageId,
    pub run_id: RunId,
    pub stage_type: StageKind,
    /// Position within the run, starting at 1
    pub sequence: u32,
    pub iteration: u32,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl StageRecord {
    /// `started_at` as a timestamp; `None` for unparseable rows
    pub fn started(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.started_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

const STAGE_COLUMNS: &str =
    "s.id, s.run_id, s.stage_type, s.sequence, s.iteration, s.status, s.output, s.started_at, s.completed_at";

type StageRow = (
    String,
    String,
    String,
    i64,
    i64,
    String,
    Option<String>,
    String,
    Option<String>,
);

fn map_stage_row(row: &Row<'_>) -> rusqlite::Result<StageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_record(row: StageRow) -> Result<StageRecord> {
    let (id, run_id, stage_type, sequence, iteration, status, output, started_at, completed_at) =
        row;
    Ok(StageRecord {
        output: json_column(output, "stage output")?,
        id: StageId::new(id),
        run_id: RunId::new(run_id),
        stage_type: stage_type.parse()?,
        sequence: sequence as u32,
        iteration: iteration as u32,
        status: status.parse()?,
        started_at,
        completed_at,
    })
}

impl Database {
    /// Insert an `active` stage for `run_id`; returns its id.
    pub fn begin_stage(&self, run_id: &RunId, stage_type: StageKind, iteration: u32) -> Result<StageId> {
        let id = StageId::generate();
        let now = now_rfc3339();

        self.conn()?
            .execute(
                "INSERT INTO workflow_stages
                 (id, run_id, stage_type, sequence, iteration, status, started_at)
                 VALUES (?1, ?2, ?3,
                         (SELECT COALESCE(MAX(sequence), 0) + 1 FROM workflow_stages WHERE run_id = ?2),
                         ?4, 'active', ?5)",
                params![id.as_str(), run_id.as_str(), stage_type.as_str(), iteration, now],
            )
            .with_context("Failed to begin stage")?;

        tracing::debug!("Stage {} began for run {} ({})", stage_type, run_id, id);
        Ok(id)
    }

    /// Move an `active` stage to a terminal status.
    ///
    /// Completing a stage that is already terminal is a `StageState` error;
    /// the stored output is never overwritten.
    pub fn complete_stage(
        &self,
        stage_id: &StageId,
        status: StageStatus,
        output: Option<&Value>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(FlowError::StageState(format!(
                "Stage {} cannot be completed with non-terminal status '{}'",
                stage_id, status
            )));
        }

        let output = output
            .map(serde_json::to_string)
            .transpose()
            .with_context("Failed to serialize stage output")?;
        let now = now_rfc3339();

        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE workflow_stages
                 SET status = ?2, output = ?3, completed_at = ?4
                 WHERE id = ?1 AND status = 'active'",
                params![stage_id.as_str(), status.as_str(), output, now],
            )
            .with_context("Failed to complete stage")?;

        if updated == 1 {
            return Ok(());
        }

        let existing: Option<String> = match conn.query_row(
            "SELECT status FROM workflow_stages WHERE id = ?1",
            params![stage_id.as_str()],
            |row| row.get(0),
        ) {
            Ok(status) => Some(status),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            Some(current) => Err(FlowError::StageState(format!(
                "Stage {} is already {}",
                stage_id, current
            ))),
            None => Err(FlowError::not_found("Stage", stage_id.as_str())),
        }
    }

    pub fn get_stage(&self, stage_id: &StageId) -> Result<Option<StageRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM workflow_stages s WHERE s.id = ?1", STAGE_COLUMNS);
        match conn.query_row(&sql, params![stage_id.as_str()], map_stage_row) {
            Ok(row) => into_record(row).map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All stages of a run, most recent first
    pub fn stages_for_run(&self, run_id: &RunId) -> Result<Vec<StageRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM workflow_stages s WHERE s.run_id = ?1 ORDER BY s.sequence DESC",
            STAGE_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .with_context("Failed to prepare stages query")?;

        let rows = stmt
            .query_map(params![run_id.as_str()], map_stage_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch stages")?;

        rows.into_iter().map(into_record).collect()
    }

    pub fn latest_stage_of_type(
        &self,
        run_id: &RunId,
        stage_type: StageKind,
    ) -> Result<Option<StageRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM workflow_stages s
             WHERE s.run_id = ?1 AND s.stage_type = ?2
             ORDER BY s.sequence DESC LIMIT 1",
            STAGE_COLUMNS
        );
        match conn.query_row(&sql, params![run_id.as_str(), stage_type.as_str()], map_stage_row) {
            Ok(row) => into_record(row).map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently started stage of a type across every run of a project
    pub fn latest_project_stage_of_type(
        &self,
        project_id: &str,
        stage_type: StageKind,
    ) -> Result<Option<StageRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM workflow_stages s
             JOIN workflow_runs r ON r.id = s.run_id
             WHERE r.project_id = ?1 AND s.stage_type = ?2
             ORDER BY s.started_at DESC, s.sequence DESC LIMIT 1",
            STAGE_COLUMNS
        );
        match conn.query_row(&sql, params![project_id, stage_type.as_str()], map_stage_row) {
            Ok(row) => into_record(row).map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `active` stages that started before `cutoff`
    pub fn active_stages_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<StageRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM workflow_stages s WHERE s.status = 'active' ORDER BY s.started_at",
            STAGE_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .with_context("Failed to prepare active stages query")?;

        let rows = stmt
            .query_map([], map_stage_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch active stages")?;

        let mut stale = Vec::new();
        for row in rows {
            let record = into_record(row)?;
            match record.started() {
                Some(started) if started < cutoff => stale.push(record),
                Some(_) => {}
                None => tracing::warn!(
                    "Stage {} has unparseable started_at '{}'",
                    record.id,
                    record.started_at
                ),
            }
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> Database {
        Database::open_in_memory_initialized().unwrap()
    }

    #[test]
    fn test_stage_lifecycle() {
        let db = db();
        let run = RunId::from("run-1");
        let stage = db.begin_stage(&run, StageKind::Planner, 1).unwrap();

        let record = db.get_stage(&stage).unwrap().unwrap();
        assert_eq!(record.status, StageStatus::Active);
        assert!(record.completed_at.is_none());
        assert_eq!(record.sequence, 1);

        db.complete_stage(&stage, StageStatus::Completed, Some(&json!({"purpose": "x"})))
            .unwrap();
        let record = db.get_stage(&stage).unwrap().unwrap();
        assert_eq!(record.status, StageStatus::Completed);
        assert!(record.completed_at.is_some());
        assert_eq!(record.output, Some(json!({"purpose": "x"})));
    }

    #[test]
    fn test_complete_twice_is_stage_state_error() {
        let db = db();
        let stage = db.begin_stage(&RunId::from("r"), StageKind::Coder, 1).unwrap();
        db.complete_stage(&stage, StageStatus::Failed, None).unwrap();

        let err = db
            .complete_stage(&stage, StageStatus::Completed, Some(&json!({"late": true})))
            .unwrap_err();
        assert!(matches!(err, FlowError::StageState(_)));

        let record = db.get_stage(&stage).unwrap().unwrap();
        assert_eq!(record.status, StageStatus::Failed);
        assert!(record.output.is_none());
    }

    #[test]
    fn test_complete_with_active_status_rejected() {
        let db = db();
        let stage = db.begin_stage(&RunId::from("r"), StageKind::Coder, 1).unwrap();
        let err = db.complete_stage(&stage, StageStatus::Active, None).unwrap_err();
        assert!(matches!(err, FlowError::StageState(_)));
    }

    #[test]
    fn test_complete_unknown_stage_is_not_found() {
        let err = db()
            .complete_stage(&StageId::from("missing"), StageStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound { .. }));
    }

    #[test]
    fn test_stages_for_run_most_recent_first() {
        let db = db();
        let run = RunId::from("run-1");
        for kind in [StageKind::Planner, StageKind::Coder, StageKind::Tester] {
            let id = db.begin_stage(&run, kind, 1).unwrap();
            db.complete_stage(&id, StageStatus::Completed, None).unwrap();
        }
        db.begin_stage(&RunId::from("other"), StageKind::Planner, 1)
            .unwrap();

        let kinds: Vec<StageKind> = db
            .stages_for_run(&run)
            .unwrap()
            .into_iter()
            .map(|s| s.stage_type)
            .collect();
        assert_eq!(
            kinds,
            vec![StageKind::Tester, StageKind::Coder, StageKind::Planner]
        );
    }

    #[test]
    fn test_latest_stage_of_type() {
        let db = db();
        let run = RunId::from("run-1");
        db.begin_stage(&run, StageKind::Coder, 1).unwrap();
        let second = db.begin_stage(&run, StageKind::Coder, 2).unwrap();

        let latest = db.latest_stage_of_type(&run, StageKind::Coder).unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.iteration, 2);
        assert!(db.latest_stage_of_type(&run, StageKind::Tester).unwrap().is_none());
    }

    #[test]
    fn test_active_stages_older_than() {
        let db = db();
        let stale = db.begin_stage(&RunId::from("r"), StageKind::Tester, 1).unwrap();
        let done = db.begin_stage(&RunId::from("r"), StageKind::Coder, 1).unwrap();
        db.complete_stage(&done, StageStatus::Completed, None).unwrap();

        let future = Utc::now() + chrono::Duration::seconds(5);
        let found = db.active_stages_older_than(future).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale);

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(db.active_stages_older_than(past).unwrap().is_empty());
    }
}
