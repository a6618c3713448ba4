//! Status Command
//!
//! Recent runs, or one run with its stages most recent first. With
//! `--project` the list is headed by the project's latest stages and
//! artifact counts.

use serde_json::json;

use crate::cli::ui::{
    Output, OutputFormat, ProjectOverview, print_json, print_run_detail, print_run_list,
};
use crate::cli::{CommandContext, is_initialized};
use crate::storage::{Database, StageKind};
use crate::types::{Result, RunId};

pub fn run(run_id: Option<&str>, project: Option<&str>, limit: usize, format: OutputFormat) -> Result<()> {
    let out = Output::new();

    if !is_initialized() {
        // Informational command: not an error
        match format {
            OutputFormat::Text => out.info("Not initialized. Run 'crewflow init' first."),
            _ => print_json(&json!({"status": "not_initialized"}))?,
        }
        return Ok(());
    }

    let ctx = CommandContext::load()?;
    match run_id {
        Some(id) => {
            let run = ctx.db.require_run(&RunId::from(id))?;
            let stages = ctx.db.stages_for_run(&run.id)?;
            let feedback = ctx.db.critic_feedback_for_run(&run.id)?;
            let artifacts = ctx.db.artifacts_for_run(&run.id)?;
            print_run_detail(&out, &run, &stages, &feedback, &artifacts, format)
        }
        None => {
            let overview = project
                .map(|project_id| project_overview(&ctx.db, project_id))
                .transpose()?;
            print_run_list(
                &out,
                &ctx.db.recent_runs(project, limit)?,
                overview.as_ref(),
                format,
            )
        }
    }
}

pub fn project_overview(db: &Database, project_id: &str) -> Result<ProjectOverview> {
    let mut latest_stages = Vec::new();
    for kind in StageKind::ALL {
        if let Some(stage) = db.latest_project_stage_of_type(project_id, kind)? {
            latest_stages.push(stage);
        }
    }

    let artifacts = db.artifacts_for_project(project_id)?;
    Ok(ProjectOverview {
        project_id: project_id.to_string(),
        latest_stages,
        artifacts: artifacts.len(),
        integrated: artifacts.iter().filter(|a| a.integrated).count(),
    })
}
