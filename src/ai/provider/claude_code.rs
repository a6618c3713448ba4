//! Claude Code CLI Provider
//!
//! Runs agents through the local `claude` CLI in print mode.
//! Single-shot: the workflow pipeline never retries a failed call.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::{
    LlmProvider, LlmResponse, ProviderConfig, ResponseMetadata, ResponseTiming, TokenUsage,
};
use crate::types::{FlowError, Result};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub struct ClaudeCodeProvider {
    model: String,
    timeout_secs: u64,
    temperature: f32,
}

impl ClaudeCodeProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            model: config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_secs: config.timeout_secs,
            temperature: config.temperature,
        }
    }

    async fn execute(&self, prompt: &str, schema: &Value) -> Result<LlmResponse> {
        let start_time = Instant::now();

        debug!(
            "Executing Claude Code CLI (model={}, temperature={})",
            self.model, self.temperature
        );

        let mut cmd = Command::new("claude");
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("json")
            .arg("--model")
            .arg(&self.model)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !schema.is_null() {
            cmd.arg("--json-schema").arg(serde_json::to_string(schema)?);
        }

        cmd.env("CLAUDE_CODE_TEMPERATURE", self.temperature.to_string());

        let child = cmd.spawn().map_err(|e| {
            FlowError::LlmApi(format!(
                "Failed to spawn Claude Code CLI: {}. Is it installed?",
                e
            ))
        })?;

        let output = timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            FlowError::LlmApi(format!(
                "Claude Code timed out after {}s",
                self.timeout_secs
            ))
        })?
        .map_err(|e| FlowError::LlmApi(format!("Claude Code execution failed: {}", e)))?;

        let elapsed = start_time.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            if let Ok(response) = serde_json::from_str::<Value>(&stdout)
                && response
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            {
                let error_msg = response
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown API error");
                return Err(FlowError::LlmApi(format!(
                    "Claude Code API error: {}",
                    error_msg
                )));
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            let error_msg = if stderr.trim().is_empty() {
                "Process exited with non-zero status"
            } else {
                stderr.as_ref()
            };
            return Err(FlowError::LlmApi(format!(
                "Claude Code failed: {}",
                error_msg
            )));
        }

        let response: Value = serde_json::from_str(&stdout).map_err(|e| {
            FlowError::LlmApi(format!("Failed to parse Claude Code output: {}", e))
        })?;

        let content = Self::extract_content(&response)?;
        let api_ms = response.get("duration_api_ms").and_then(|v| v.as_u64());

        Ok(LlmResponse::with_metrics(
            content,
            TokenUsage::from_usage_json(response.get("usage")),
            Self::extract_cost(&response),
            ResponseTiming::with_api_time(elapsed, api_ms),
            ResponseMetadata {
                model: self.model.clone(),
                provider: "claude-code".to_string(),
            },
        ))
    }

    /// `structured_output` when a schema was given, otherwise `result`.
    /// A textual result is handed on as a string; the output parser decides
    /// whether it is JSON.
    fn extract_content(response: &Value) -> Result<Value> {
        if let Some(structured) = response.get("structured_output") {
            return Ok(structured.clone());
        }

        match response.get("result") {
            Some(result @ (Value::Object(_) | Value::Array(_) | Value::String(_))) => {
                Ok(result.clone())
            }
            Some(_) => Err(FlowError::LlmApi(
                "No structured output in response".to_string(),
            )),
            None => Err(FlowError::LlmApi(
                "No result in Claude Code response".to_string(),
            )),
        }
    }

    fn extract_cost(response: &Value) -> f64 {
        response
            .get("total_cost_usd")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl LlmProvider for ClaudeCodeProvider {
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<LlmResponse> {
        info!(
            "Generating with Claude Code CLI (model: {}, temperature: {})",
            self.model, self.temperature
        );
        self.execute(prompt, schema).await
    }

    fn name(&self) -> &str {
        "claude-code"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let output = Command::new("claude")
            .arg("--version")
            .output()
            .await
            .map_err(|e| FlowError::LlmApi(format!("Claude Code not found: {}", e)))?;

        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            info!("Claude Code CLI available: {}", version.trim());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
