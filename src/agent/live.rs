//! Live backend over an `LlmProvider`, and capability selection.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::{AgentCapability, RoleConfig, SharedCapability, SimulatedProvider};
use crate::ai::{ProviderConfig, SharedMetrics, SharedProvider, create_provider};
use crate::config::LlmConfig;
use crate::types::{FlowError, Result};

pub struct LiveProvider {
    provider: SharedProvider,
    metrics: Option<SharedMetrics>,
}

impl LiveProvider {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn persona_prompt(role: &RoleConfig, task: &str) -> String {
        format!("You are the {}. Your goal: {}.\n\n{}", role.title, role.goal, task)
    }
}

#[async_trait]
impl AgentCapability for LiveProvider {
    async fn invoke(&self, role: &RoleConfig, task: &str) -> Result<Value> {
        let prompt = Self::persona_prompt(role, task);
        let response = self.provider.generate(&prompt, &Value::Null).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_response(&response);
        }

        Ok(response.content)
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Choose the backend once, at construction time.
///
/// A live provider that cannot be built or fails its health check is replaced
/// by the simulated backend when `fallback_to_simulation` is set.
pub async fn select_capability(
    llm: &LlmConfig,
    metrics: Option<SharedMetrics>,
) -> Result<SharedCapability> {
    if llm.provider == "simulated" {
        info!("Using simulated agent backend");
        return Ok(Arc::new(SimulatedProvider::new()));
    }

    let unavailable = match create_provider(&ProviderConfig::from(llm)) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => {
                info!("Using live agent backend: {} ({})", provider.name(), provider.model());
                let mut live = LiveProvider::new(provider);
                if let Some(metrics) = metrics {
                    live = live.with_metrics(metrics);
                }
                return Ok(Arc::new(live));
            }
            Ok(false) => format!("Provider {} failed its health check", llm.provider),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    if llm.fallback_to_simulation {
        warn!(
            "Live provider unavailable ({}); falling back to simulation",
            unavailable
        );
        Ok(Arc::new(SimulatedProvider::new()))
    } else {
        Err(FlowError::LlmApi(format!(
            "Provider {} unavailable: {}",
            llm.provider, unavailable
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::ai::{LlmProvider, LlmResponse, TokenUsage, create_shared_metrics};
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingProvider {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn generate(&self, prompt: &str, _schema: &Value) -> Result<LlmResponse> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut response = LlmResponse::content_only(json!({"files": []}));
            response.usage = TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..TokenUsage::default()
            };
            Ok(response)
        }

        fn name(&self) -> &str {
            "recording"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_live_provider_prefixes_persona_and_records_usage() {
        let provider = Arc::new(RecordingProvider {
            prompts: Mutex::new(Vec::new()),
        });
        let metrics = create_shared_metrics("test");
        let live = LiveProvider::new(provider.clone()).with_metrics(Arc::clone(&metrics));

        let value = live
            .invoke(&RoleConfig::for_role(AgentRole::Coder), "write code")
            .await
            .unwrap();
        assert_eq!(value, json!({"files": []}));

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("You are the Senior Software Engineer."));
        assert!(prompts[0].ends_with("write code"));
        assert_eq!(metrics.snapshot().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_select_simulated() {
        let llm = LlmConfig {
            provider: "simulated".to_string(),
            ..LlmConfig::default()
        };
        let capability = select_capability(&llm, None).await.unwrap();
        assert!(capability.is_simulated());
    }

    #[tokio::test]
    async fn test_select_falls_back_when_unavailable() {
        // A loopback port nobody listens on fails the health check
        let llm = LlmConfig {
            provider: "anthropic".to_string(),
            api_base: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 2,
            fallback_to_simulation: true,
            ..LlmConfig::default()
        };
        let capability = select_capability(&llm, None).await.unwrap();
        assert!(capability.is_simulated());

        let strict = LlmConfig {
            fallback_to_simulation: false,
            ..llm
        };
        assert!(select_capability(&strict, None).await.is_err());
    }
}
