//! Rendering of workflow results and run records.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

use super::Output;
use crate::parser::{
    CodeFile, CodeStats, KeyInfo, count_code_stats, extract_critical_issues, extract_key_info,
    file_tree,
};
use crate::storage::{ArtifactRecord, CriticFeedbackRecord, RunRecord, StageRecord};
use crate::types::{Result, truncate_chars};
use crate::workflow::WorkflowResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<bool> {
    match format {
        OutputFormat::Json => print_json(value).map(|_| true),
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
            Ok(true)
        }
        OutputFormat::Text => Ok(false),
    }
}

pub fn print_workflow_result(out: &Output, result: &WorkflowResult, format: OutputFormat) -> Result<()> {
    if print_structured(result, format)? {
        return Ok(());
    }

    out.header(&format!("Workflow {}", result.workflow_id));
    out.field("Project", &result.project_id);
    out.field("Status", out.status(result.status.as_str()));
    out.field("Stage", result.stage);
    out.field("Iteration", result.iteration);
    if let Some(score) = result.validation_score {
        out.field("Prompt score", format!("{}/100", score));
    }
    if let Some(spec) = &result.specification {
        out.field("Complexity", describe_key_info(&extract_key_info(spec)));
    }

    if let Some(validation) = &result.validation
        && !validation.valid
    {
        out.section("Prompt issues");
        for issue in &validation.issues {
            println!("  - {}", issue);
        }
        for suggestion in &validation.suggestions {
            println!("  * {}", suggestion);
        }
    }

    if let Some(files) = &result.code_files {
        let stats = count_code_stats(files);
        out.section(&format!(
            "Code files ({}, {} lines)",
            stats.total_files, stats.total_lines
        ));
        for file in files {
            println!("  {}", file.path);
        }
    }
    if let Some(tests) = &result.test_files {
        out.section(&format!("Test files ({})", tests.len()));
        for test in tests {
            println!("  {}", test.file);
        }
    }
    if let Some(summary) = &result.test_summary {
        out.section("Review");
        println!("{}", summary);
    }
    if let Some(review) = &result.review {
        let blocking = extract_critical_issues(review);
        if !blocking.is_empty() {
            out.section(&format!("Blocking issues ({})", blocking.len()));
            for issue in &blocking {
                println!(
                    "  [{}] {}",
                    issue.get("severity").and_then(Value::as_str).unwrap_or("?"),
                    issue.get("description").and_then(Value::as_str).unwrap_or("")
                );
            }
        }
    }

    println!();
    match (&result.error, &result.message) {
        (Some(error), _) => out.error(error),
        (None, Some(message)) if result.is_failed() => out.error(message),
        (None, Some(message)) => out.info(message),
        (None, None) => out.success("Workflow completed"),
    }
    Ok(())
}

fn describe_key_info(info: &KeyInfo) -> String {
    format!(
        "{} ({} components, {})",
        info.complexity, info.num_components, info.technology
    )
}

/// Project summary shown above its run list
#[derive(Debug, Serialize)]
pub struct ProjectOverview {
    pub project_id: String,
    /// Latest stage of each kind across the project's runs
    pub latest_stages: Vec<StageRecord>,
    pub artifacts: usize,
    pub integrated: usize,
}

#[derive(Serialize)]
struct ProjectRuns<'a> {
    project: &'a ProjectOverview,
    runs: &'a [RunRecord],
}

pub fn print_run_list(
    out: &Output,
    runs: &[RunRecord],
    overview: Option<&ProjectOverview>,
    format: OutputFormat,
) -> Result<()> {
    let printed = match overview {
        Some(project) => print_structured(&ProjectRuns { project, runs }, format)?,
        None => print_structured(&runs, format)?,
    };
    if printed {
        return Ok(());
    }

    if let Some(project) = overview {
        out.header(&format!("Project {}", project.project_id));
        out.field(
            "Artifacts",
            format!("{} ({} integrated)", project.artifacts, project.integrated),
        );
        for stage in &project.latest_stages {
            out.field(
                &format!("Last {}", stage.stage_type),
                format!(
                    "{} {} ({})",
                    out.status(stage.status.as_str()),
                    stage.run_id,
                    stage.completed_at.as_deref().unwrap_or(&stage.started_at)
                ),
            );
        }
    }

    if runs.is_empty() {
        out.info("No workflow runs yet. Start one with 'crewflow run'.");
        return Ok(());
    }

    out.header("Recent runs");
    for run in runs {
        println!(
            "  {}  {:<18} it={}  {:<12} {}",
            run.id,
            out.status(run.status.as_str()),
            run.iteration,
            run.project_id,
            truncate_chars(run.original_prompt.lines().next().unwrap_or(""), 48)
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct RunDetail<'a> {
    run: &'a RunRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_info: Option<KeyInfo>,
    stages: &'a [StageRecord],
    critic_feedback: &'a [CriticFeedbackRecord],
    artifacts: Vec<ArtifactSummary<'a>>,
    code_stats: CodeStats,
    /// Directory tree of every stored artifact
    file_tree: Value,
}

#[derive(Serialize)]
struct ArtifactSummary<'a> {
    id: &'a str,
    name: &'a str,
    artifact_type: &'a str,
    integrated: bool,
}

/// One run with its stages (most recent first), critic feedback and artifacts
pub fn print_run_detail(
    out: &Output,
    run: &RunRecord,
    stages: &[StageRecord],
    feedback: &[CriticFeedbackRecord],
    artifacts: &[ArtifactRecord],
    format: OutputFormat,
) -> Result<()> {
    let files: Vec<CodeFile> = artifacts
        .iter()
        .map(|a| CodeFile {
            path: a.name.clone(),
            content: a.content.clone(),
            description: a
                .metadata
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        })
        .collect();
    let detail = RunDetail {
        run,
        key_info: run
            .approved_specification
            .as_ref()
            .or(run.specification.as_ref())
            .map(extract_key_info),
        stages,
        critic_feedback: feedback,
        artifacts: artifacts
            .iter()
            .map(|a| ArtifactSummary {
                id: &a.id,
                name: &a.name,
                artifact_type: a.artifact_type.as_str(),
                integrated: a.integrated,
            })
            .collect(),
        code_stats: count_code_stats(&files),
        file_tree: file_tree(&files),
    };
    if print_structured(&detail, format)? {
        return Ok(());
    }

    out.header(&format!("Run {}", run.id));
    out.field("Project", &run.project_id);
    out.field("Status", out.status(run.status.as_str()));
    out.field("Iteration", run.iteration);
    if let Some(stage) = &run.last_stage {
        out.field("Last stage", stage);
    }
    if let Some(error) = &run.last_error {
        out.field("Last error", error);
    }
    if let Some(task) = &run.task_id {
        out.field("Task", task);
    }
    if run.canceled {
        out.field("Cancel", "requested");
    }
    out.field("Approved spec", if run.approved_specification.is_some() { "yes" } else { "no" });
    if let Some(info) = &detail.key_info {
        out.field("Complexity", describe_key_info(info));
    }
    out.field("Updated", &run.updated_at);

    out.section("Stages");
    if stages.is_empty() {
        println!("  (none)");
    }
    for stage in stages {
        println!(
            "  #{:<3} {:<8} it={}  {:<18} {}",
            stage.sequence,
            stage.stage_type,
            stage.iteration,
            out.status(stage.status.as_str()),
            stage.completed_at.as_deref().unwrap_or(&stage.started_at)
        );
    }

    if !feedback.is_empty() {
        out.section("Critic feedback");
        for entry in feedback {
            let marker = if entry.degraded { " (degraded)" } else { "" };
            println!(
                "  [{}] {}{}: {}",
                entry.iteration,
                out.status(&entry.status.to_string()),
                marker,
                truncate_chars(&entry.feedback, 80)
            );
        }
    }

    if !artifacts.is_empty() {
        let stats = &detail.code_stats;
        let types: Vec<String> = stats
            .file_types
            .iter()
            .map(|(ext, count)| format!("{}={}", ext, count))
            .collect();
        out.section(&format!(
            "Artifacts ({} lines; {})",
            stats.total_lines,
            types.join(", ")
        ));
        for artifact in artifacts {
            let marker = if artifact.integrated { " ✓" } else { "" };
            println!("  {:<5} {}{}", artifact.artifact_type, artifact.name, marker);
        }
    }
    Ok(())
}
