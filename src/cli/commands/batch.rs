//! Batch Command
//!
//! One workflow per non-empty line of a prompt file, run concurrently.
//! Lines starting with `#` are skipped. In text mode each run is reported
//! as it settles.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use super::run::task_title;
use crate::cli::CommandContext;
use crate::cli::ui::{Output, OutputFormat, print_json};
use crate::storage::WorkflowStatus;
use crate::types::{FlowError, Result, truncate_chars};
use crate::workflow::{ProjectEvents, WorkflowRequest, is_settled_event, run_batch};

pub fn read_prompts(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub async fn run(
    file: &Path,
    project: Option<&str>,
    concurrency: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let prompts = read_prompts(&std::fs::read_to_string(file)?);
    if prompts.is_empty() {
        return Err(FlowError::Config(format!("No prompts in {}", file.display())));
    }

    let ctx = CommandContext::load()?;
    let project = project
        .map(str::to_string)
        .unwrap_or_else(|| ctx.default_project_id());

    let mut requests = Vec::with_capacity(prompts.len());
    for prompt in &prompts {
        let task_id = ctx.db.create_task(&project, &task_title(prompt))?;
        requests.push(WorkflowRequest::new(&project, prompt).with_task(task_id));
    }

    let concurrency = concurrency.unwrap_or(ctx.config.workflow.batch_concurrency);
    let pipeline = ctx.pipeline().await?;

    let progress = (format == OutputFormat::Text).then(|| {
        let events = ctx.bus.subscribe_project(&project);
        tokio::spawn(report_progress(events, requests.len(), ctx.timeouts().stage))
    });
    let results = run_batch(&pipeline, requests, concurrency).await;
    if let Some(progress) = progress {
        progress.abort();
    }

    let out = Output::new();
    match format {
        OutputFormat::Text => {
            out.header(&format!("Batch of {} workflows", results.len()));
            for (prompt, result) in prompts.iter().zip(&results) {
                println!(
                    "  {}  {:<18} {}",
                    result.workflow_id,
                    out.status(result.status.as_str()),
                    truncate_chars(prompt, 48)
                );
            }
            let failed = results.iter().filter(|r| r.status == WorkflowStatus::Failed).count();
            if failed > 0 {
                out.warning(&format!("{} of {} workflows failed", failed, results.len()));
            } else {
                out.success("All workflows settled");
            }
        }
        _ => print_json(&json!({"results": results}))?,
    }
    Ok(())
}

/// One line per settled run, until `total` have settled or nothing arrives for `idle`
async fn report_progress(mut events: ProjectEvents, total: usize, idle: Duration) -> usize {
    let out = Output::new();
    for settled in 1..=total {
        match events.next_matching(is_settled_event, idle).await {
            Ok(Some(event)) => out.info(&format!(
                "[{}/{}] {} {}",
                settled,
                total,
                event.payload["workflow_id"].as_str().unwrap_or("-"),
                event.event_type
            )),
            Ok(None) => return settled - 1,
            Err(e) => {
                debug!("Batch progress stopped: {}", e);
                return settled - 1;
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::{Harness, ScriptedCapability, TASK_MANAGER_PROMPT};
    use crate::config::WorkflowConfig;

    #[test]
    fn test_read_prompts_skips_blank_and_comment_lines() {
        let content = "# prompts\nBuild a blog\n\n   \nBuild a chat app  \n#skip\n";
        assert_eq!(read_prompts(content), vec!["Build a blog", "Build a chat app"]);
    }

    #[tokio::test]
    async fn test_progress_counts_every_settled_run() {
        let harness = Harness::new();
        let pipeline = harness.pipeline(
            ScriptedCapability::simulated(),
            WorkflowConfig {
                require_user_approval: false,
                ..WorkflowConfig::default()
            },
        );
        let events = harness.bus.subscribe_project("proj");
        let progress = tokio::spawn(report_progress(events, 2, Duration::from_secs(5)));

        let requests = vec![
            WorkflowRequest::new("proj", TASK_MANAGER_PROMPT),
            WorkflowRequest::new("proj", "make app"),
        ];
        let results = run_batch(&pipeline, requests, 2).await;

        assert_eq!(results.len(), 2);
        assert_eq!(progress.await.unwrap(), 2);
    }
}
