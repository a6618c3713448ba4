//! Refine Command
//!
//! Start a new run from an earlier run's prompt and specification plus
//! the user's refinement notes.

use crate::cli::CommandContext;
use crate::cli::ui::{Output, OutputFormat, print_workflow_result};
use crate::types::{FlowError, Result, RunId};

pub async fn run(run_id: &str, notes: &str, format: OutputFormat) -> Result<()> {
    if notes.trim().is_empty() {
        return Err(FlowError::Config("Refinement notes must not be empty".to_string()));
    }

    let ctx = CommandContext::load()?;
    let previous = ctx.db.require_run(&RunId::from(run_id))?;
    let specification = previous
        .approved_specification
        .as_ref()
        .or(previous.specification.as_ref())
        .ok_or_else(|| FlowError::not_found("specification", previous.id.as_str()))?;

    let result = ctx
        .pipeline()
        .await?
        .refine_workflow(
            &previous.project_id,
            &previous.original_prompt,
            notes,
            specification,
            1,
        )
        .await;
    print_workflow_result(&Output::new(), &result, format)
}
