//! AI Integration Layer
//!
//! Live LLM backends used by the agent adapter, plus timeout helpers and
//! invocation metrics.

pub mod metrics;
pub mod provider;
pub mod timeout;

pub use metrics::{
    MetricsCollector, MetricsSummary, RoleMetrics, SharedMetrics, create_shared_metrics,
};
pub use provider::{
    AnthropicProvider, ClaudeCodeProvider, ErrorCategory, ErrorClassifier, LlmError, LlmProvider,
    LlmResponse, ProviderConfig, ResponseMetadata, ResponseTiming, SharedProvider, TokenUsage,
    create_provider,
};
pub use timeout::{TimeoutConfig, with_timeout, with_timeout_map};
