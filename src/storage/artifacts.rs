//! Artifact persistence. Artifacts are append-only; only `integrated` flips.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::database::{Database, json_column, now_rfc3339};
use crate::types::{FlowError, Result, ResultExt, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    /// Source produced by the coder
    Code,
    /// Test produced by the tester
    Test,
    /// File of an integrated package
    File,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Test => "test",
            Self::File => "file",
        }
    }
}

impl FromStr for ArtifactType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "code" => Ok(Self::Code),
            "test" => Ok(Self::Test),
            "file" => Ok(Self::File),
            other => Err(FlowError::Storage(format!("Unknown artifact type: {}", other))),
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact {
    pub name: String,
    pub artifact_type: ArtifactType,
    pub content: String,
    pub metadata: Value,
}

/// Where a batch of artifacts came from
#[derive(Debug, Clone, Copy)]
pub struct ArtifactOwner<'a> {
    pub project_id: &'a str,
    pub task_id: Option<&'a str>,
    pub run_id: Option<&'a RunId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub run_id: Option<String>,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub content: String,
    pub metadata: Value,
    pub integrated: bool,
    pub created_at: String,
}

impl Database {
    /// Insert a batch atomically; returns the new ids in input order.
    pub fn store_artifacts(
        &self,
        owner: ArtifactOwner<'_>,
        artifacts: &[NewArtifact],
    ) -> Result<Vec<String>> {
        let now = now_rfc3339();
        let project_id = owner.project_id.to_string();
        let task_id = owner.task_id.map(str::to_string);
        let run_id = owner.run_id.map(|r| r.as_str().to_string());

        let rows = artifacts
            .iter()
            .map(|a| {
                serde_json::to_string(&a.metadata).map(|metadata| {
                    (
                        uuid::Uuid::new_v4().to_string(),
                        a.name.clone(),
                        a.artifact_type.as_str(),
                        a.content.clone(),
                        metadata,
                    )
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to serialize artifact metadata")?;

        let ids = self.transaction(move |conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO artifacts
                 (id, project_id, task_id, run_id, name, artifact_type, content, metadata, integrated, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            )?;

            let mut ids = Vec::with_capacity(rows.len());
            for (id, name, artifact_type, content, metadata) in &rows {
                stmt.execute(params![
                    id,
                    project_id,
                    task_id,
                    run_id,
                    name,
                    artifact_type,
                    content,
                    metadata,
                    now
                ])?;
                ids.push(id.clone());
            }
            Ok(ids)
        })?;

        tracing::debug!(
            "Stored {} artifacts for project {}",
            ids.len(),
            owner.project_id
        );
        Ok(ids)
    }

    /// Artifacts of a run, oldest first
    pub fn artifacts_for_run(&self, run_id: &RunId) -> Result<Vec<ArtifactRecord>> {
        self.query_artifacts(
            "SELECT id, project_id, task_id, run_id, name, artifact_type, content, metadata, integrated, created_at
             FROM artifacts WHERE run_id = ?1 ORDER BY created_at, rowid",
            run_id.as_str(),
        )
    }

    /// Artifacts of a project, oldest first
    pub fn artifacts_for_project(&self, project_id: &str) -> Result<Vec<ArtifactRecord>> {
        self.query_artifacts(
            "SELECT id, project_id, task_id, run_id, name, artifact_type, content, metadata, integrated, created_at
             FROM artifacts WHERE project_id = ?1 ORDER BY created_at, rowid",
            project_id,
        )
    }

    fn query_artifacts(&self, sql: &str, key: &str) -> Result<Vec<ArtifactRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .with_context("Failed to prepare artifacts query")?;

        let rows = stmt
            .query_map(params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, bool>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch artifacts")?;

        let mut artifacts = Vec::with_capacity(rows.len());
        for (id, project_id, task_id, run_id, name, kind, content, metadata, integrated, created_at) in
            rows
        {
            artifacts.push(ArtifactRecord {
                artifact_type: kind.parse()?,
                metadata: json_column(Some(metadata), "artifact metadata")?
                    .unwrap_or(Value::Null),
                id,
                project_id,
                task_id,
                run_id,
                name,
                content,
                integrated,
                created_at,
            });
        }
        Ok(artifacts)
    }

    /// Flip `integrated` on; returns how many rows changed.
    pub fn mark_integrated(&self, artifact_ids: &[String]) -> Result<usize> {
        let ids = artifact_ids.to_vec();
        self.transaction(move |conn| {
            let mut stmt =
                conn.prepare("UPDATE artifacts SET integrated = 1 WHERE id = ?1 AND integrated = 0")?;
            let mut changed = 0;
            for id in &ids {
                changed += stmt.execute(params![id])?;
            }
            Ok(changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(name: &str, artifact_type: ArtifactType) -> NewArtifact {
        NewArtifact {
            name: name.to_string(),
            artifact_type,
            content: format!("# {}", name),
            metadata: json!({"description": "", "generated_by": "coder_agent"}),
        }
    }

    #[test]
    fn test_store_and_list_artifacts() {
        let db = Database::open_in_memory_initialized().unwrap();
        let run_id = RunId::from("run-1");
        let owner = ArtifactOwner {
            project_id: "proj",
            task_id: Some("task-1"),
            run_id: Some(&run_id),
        };

        let ids = db
            .store_artifacts(
                owner,
                &[
                    artifact("main.py", ArtifactType::Code),
                    artifact("tests/test_main.py", ArtifactType::Test),
                ],
            )
            .unwrap();
        assert_eq!(ids.len(), 2);

        let stored = db.artifacts_for_run(&run_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].name, "main.py");
        assert_eq!(stored[1].artifact_type, ArtifactType::Test);
        assert!(!stored[0].integrated);
        assert_eq!(stored[0].metadata["generated_by"], "coder_agent");
        assert_eq!(db.artifacts_for_project("proj").unwrap().len(), 2);
    }

    #[test]
    fn test_mark_integrated_once() {
        let db = Database::open_in_memory_initialized().unwrap();
        let owner = ArtifactOwner {
            project_id: "proj",
            task_id: None,
            run_id: None,
        };
        let ids = db
            .store_artifacts(owner, &[artifact("README.md", ArtifactType::File)])
            .unwrap();

        assert_eq!(db.mark_integrated(&ids).unwrap(), 1);
        assert_eq!(db.mark_integrated(&ids).unwrap(), 0);
        assert!(db.artifacts_for_project("proj").unwrap()[0].integrated);
    }

    #[test]
    fn test_store_empty_batch() {
        let db = Database::open_in_memory_initialized().unwrap();
        let owner = ArtifactOwner {
            project_id: "proj",
            task_id: None,
            run_id: None,
        };
        assert!(db.store_artifacts(owner, &[]).unwrap().is_empty());
    }
}
