//! Anthropic Messages API Provider
//!
//! Direct HTTPS backend for environments without the Claude Code CLI.
//! Returns LlmResponse with token usage metrics for cost tracking.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    ErrorClassifier, LlmProvider, LlmResponse, ProviderConfig, ResponseMetadata, ResponseTiming,
    TokenUsage,
};
use crate::constants::network;
use crate::types::{FlowError, Result};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

/// Anthropic API provider with secure API key handling
pub struct AnthropicProvider {
    api_key: SecretString,
    endpoint: Url,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key_str = config
            .api_key
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                FlowError::Config(
                    "Anthropic API key not found. Set ANTHROPIC_API_KEY env var".to_string(),
                )
            })?;

        let endpoint = Self::messages_endpoint(config.api_base.as_deref())?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| FlowError::LlmApi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            endpoint,
            model: config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    /// `<api_base>/v1/messages`; `api_base` must be an absolute http(s) URL
    fn messages_endpoint(api_base: Option<&str>) -> Result<Url> {
        let base = api_base.unwrap_or(DEFAULT_API_BASE).trim_end_matches('/');
        let url = Url::parse(&format!("{}/v1/messages", base))
            .map_err(|e| FlowError::Config(format!("Invalid api_base '{}': {}", base, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FlowError::Config(format!(
                "Invalid api_base '{}': scheme must be http or https",
                base
            )));
        }
        Ok(url)
    }

    fn build_request(&self, prompt: &str, schema: &Value) -> MessagesRequest {
        let system = if schema.is_null() {
            None
        } else {
            let schema_str =
                serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
            Some(format!(
                "Respond ONLY with valid JSON matching this schema:\n\n```json\n{}\n```",
                schema_str
            ))
        };

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<LlmResponse> {
        info!(
            "Generating with Anthropic API (model: {}, temperature: {})",
            self.model, self.temperature
        );

        let start_time = Instant::now();
        let request = self.build_request(prompt, schema);

        let response = self
            .request(reqwest::Method::POST, self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| FlowError::LlmApi(format!("Anthropic request failed: {}", e)))?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Anthropic API error ({}): {}", status, body),
                "anthropic",
            )
            .into());
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            FlowError::LlmApi(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let text: String = body
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        if text.is_empty() {
            return Err(FlowError::LlmApi(
                "No text content in Anthropic response".to_string(),
            ));
        }

        debug!("Received {} chars from Anthropic", text.len());

        Ok(LlmResponse::with_metrics(
            Value::String(text),
            TokenUsage::from_usage_json(body.usage.as_ref()),
            0.0, // not reported by the API
            ResponseTiming::from_duration(elapsed),
            ResponseMetadata {
                model: self.model.clone(),
                provider: "anthropic".to_string(),
            },
        ))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let mut url = self.endpoint.clone();
        url.set_path("/v1/models");

        match self.request(reqwest::Method::GET, url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("Anthropic API is available");
                Ok(true)
            }
            Ok(resp) => {
                warn!("Anthropic API check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Anthropic API check failed: {}", e);
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}
