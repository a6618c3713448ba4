//! Review Command
//!
//! Run the critic loop over a run's generated code. On approval the
//! integrator's package is stored and the source artifacts marked. A run can
//! be reviewed again after a rejection; iteration numbers continue.

use serde_json::{Value, json};

use crate::cli::CommandContext;
use crate::cli::ui::{Output, OutputFormat, print_json};
use crate::storage::{ArtifactRecord, ArtifactType};
use crate::types::{FlowError, Result, RunId};
use crate::workflow::ReviewTarget;

/// `{files: [...]}` from the run's not-yet-integrated code artifacts
pub fn implementation_from_artifacts(artifacts: &[ArtifactRecord]) -> (Value, Vec<String>) {
    let code: Vec<&ArtifactRecord> = artifacts
        .iter()
        .filter(|a| a.artifact_type == ArtifactType::Code && !a.integrated)
        .collect();

    let files: Vec<Value> = code
        .iter()
        .map(|a| {
            json!({
                "path": a.name,
                "content": a.content,
                "description": a.metadata.get("description").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();
    let ids = code.iter().map(|a| a.id.clone()).collect();
    (json!({"files": files}), ids)
}

pub async fn run(run_id: &str, format: OutputFormat) -> Result<()> {
    let ctx = CommandContext::load()?;
    let run = ctx.db.require_run(&RunId::from(run_id))?;

    let (implementation, source_ids) =
        implementation_from_artifacts(&ctx.db.artifacts_for_run(&run.id)?);
    if source_ids.is_empty() {
        return Err(FlowError::not_found("unreviewed code artifacts for run", run.id.as_str()));
    }

    let report = ctx
        .critic()
        .await?
        .run(
            ReviewTarget {
                project_id: &run.project_id,
                run_id: &run.id,
                task_id: run.task_id.as_deref(),
            },
            implementation,
        )
        .await?;

    if report.is_approved() {
        ctx.db.mark_integrated(&source_ids)?;
    }

    let out = Output::new();
    match format {
        OutputFormat::Text => {
            out.header(&format!("Review of run {}", run.id));
            out.field("Iterations", report.iterations);
            for (i, feedback) in report.feedback.iter().enumerate() {
                out.field(&format!("Feedback {}", i + 1), feedback);
            }
            if report.is_approved() {
                let note = if report.degraded { " (degraded)" } else { "" };
                out.success(&format!(
                    "Approved; integrated {} files{}",
                    report.artifact_ids.len(),
                    note
                ));
                if let Some(instructions) = &report.deployment_instructions {
                    out.field("Deploy", instructions);
                }
            }
        }
        _ => print_json(&report)?,
    }

    report.into_result().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ArtifactOwner, Database, NewArtifact, NewRun};

    #[test]
    fn test_implementation_skips_tests_and_integrated_code() {
        let db = Database::open_in_memory_initialized().unwrap();
        let run_id = RunId::generate();
        db.create_run(&NewRun {
            id: &run_id,
            project_id: "proj",
            task_id: None,
            original_prompt: "prompt",
            iteration: 1,
        })
        .unwrap();

        let artifact = |name: &str, artifact_type| NewArtifact {
            name: name.to_string(),
            artifact_type,
            content: format!("// {}", name),
            metadata: json!({"description": name}),
        };
        let ids = db
            .store_artifacts(
                ArtifactOwner {
                    project_id: "proj",
                    task_id: None,
                    run_id: Some(&run_id),
                },
                &[
                    artifact("main.py", ArtifactType::Code),
                    artifact("old.py", ArtifactType::Code),
                    artifact("test_main.py", ArtifactType::Test),
                ],
            )
            .unwrap();
        db.mark_integrated(&ids[1..2]).unwrap();

        let (implementation, source_ids) =
            implementation_from_artifacts(&db.artifacts_for_run(&run_id).unwrap());

        assert_eq!(source_ids, vec![ids[0].clone()]);
        let files = implementation["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["path"], "main.py");
        assert_eq!(files[0]["content"], "// main.py");
    }
}
