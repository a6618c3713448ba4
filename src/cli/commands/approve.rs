//! Approve Command
//!
//! Resume a run suspended at `awaiting_approval`, with its stored
//! specification or an edited one.

use std::path::Path;

use serde_json::Value;

use crate::cli::CommandContext;
use crate::cli::ui::{Output, OutputFormat, print_workflow_result};
use crate::parser::validate_specification;
use crate::storage::{RunRecord, WorkflowStatus};
use crate::types::{FlowError, Result, RunId};
use crate::workflow::WorkflowRequest;

/// The specification to approve: an edited file if given, else the stored one
pub fn resolve_specification(run: &RunRecord, spec_file: Option<&Path>) -> Result<Value> {
    if run.status != WorkflowStatus::AwaitingApproval {
        return Err(FlowError::StageState(format!(
            "Run {} is {}, not awaiting approval",
            run.id, run.status
        )));
    }

    let specification = match spec_file {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => run
            .specification
            .clone()
            .ok_or_else(|| FlowError::not_found("specification", run.id.as_str()))?,
    };
    validate_specification(&specification)?;
    Ok(specification)
}

pub async fn run(run_id: &str, spec_file: Option<&Path>, format: OutputFormat) -> Result<()> {
    let ctx = CommandContext::load()?;
    let run = ctx.db.require_run(&RunId::from(run_id))?;
    let specification = resolve_specification(&run, spec_file)?;

    let mut request = WorkflowRequest::new(&run.project_id, &run.original_prompt)
        .with_run_id(run.id.clone())
        .with_iteration(run.iteration)
        .with_approved_spec(specification);
    if let Some(task) = &run.task_id {
        request = request.with_task(task.clone());
    }

    let result = ctx.pipeline().await?.execute(request).await;
    print_workflow_result(&Output::new(), &result, format)
}
