//! Run Command
//!
//! Start a workflow for a prompt. Each run gets its own task.

use tracing::info;

use crate::cli::CommandContext;
use crate::cli::ui::{Output, OutputFormat, print_workflow_result};
use crate::types::{Result, truncate_chars};
use crate::workflow::WorkflowRequest;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub prompt: String,
    pub project: Option<String>,
    /// Skip the approval gate regardless of config
    pub no_approval: bool,
    /// Re-enter automatically while the run needs refinement
    pub auto_iterate: bool,
    pub format: OutputFormat,
}

/// Task title: first line of the prompt, shortened
pub fn task_title(prompt: &str) -> String {
    let first = prompt.trim().lines().next().unwrap_or("").trim();
    if first.chars().count() > 60 {
        format!("{}...", truncate_chars(first, 57))
    } else {
        first.to_string()
    }
}

pub async fn run(options: RunOptions) -> Result<()> {
    let ctx = CommandContext::load()?;
    let project = options
        .project
        .clone()
        .unwrap_or_else(|| ctx.default_project_id());

    let mut pipeline = ctx.pipeline().await?;
    if options.no_approval {
        pipeline = pipeline.with_require_approval(false);
    }

    let task_id = ctx.db.create_task(&project, &task_title(&options.prompt))?;
    info!("Created task {} for project {}", task_id, project);

    let request = WorkflowRequest::new(&project, &options.prompt).with_task(task_id);
    let result = if options.auto_iterate {
        pipeline.execute_until_settled(request).await
    } else {
        pipeline.execute(request).await
    };

    let out = Output::new();
    print_workflow_result(&out, &result, options.format)?;
    if options.format == OutputFormat::Text {
        if result.status == crate::storage::WorkflowStatus::AwaitingApproval {
            out.info(&format!("Approve with: crewflow approve {}", result.workflow_id));
        }
        tracing::debug!("{}", ctx.metrics.summary().display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_title_uses_first_line() {
        assert_eq!(task_title("  Build a blog\nwith comments"), "Build a blog");
    }

    #[test]
    fn test_task_title_is_shortened() {
        let title = task_title(&"x".repeat(100));
        assert_eq!(title.chars().count(), 60);
        assert!(title.ends_with("..."));
    }
}
