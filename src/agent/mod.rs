//! Agent Invocation Adapter
//!
//! Single entry point for running one agent role against a task description.
//! The backend is an injected [`AgentCapability`]:
//!
//! - [`SimulatedProvider`]: canned, role-shaped outputs (no LLM)
//! - [`LiveProvider`]: delegates to a live [`LlmProvider`](crate::ai::LlmProvider)
//!
//! [`AgentInvoker::invoke`] never returns an error. Timeouts, provider
//! failures and worker panics all become an [`AgentResult`] with
//! `status == Failed`, so the pipeline can turn them into a terminal stage.
//!
//! Every invocation emits one record on the `crewflow::audit` target.

mod live;
pub mod prompt;
mod simulated;

pub use live::{LiveProvider, select_capability};
pub use prompt::{build_structured_prompt, extract_user_input};
pub use simulated::SimulatedProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::ai::{ErrorClassifier, SharedMetrics, TimeoutConfig, with_timeout_map};
use crate::types::{FlowError, Result, RunId};

/// Tracing target for per-invocation audit records
pub const AUDIT_TARGET: &str = "crewflow::audit";

// =============================================================================
// Roles
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Coder,
    Tester,
    Critic,
    Integrator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        Self::Planner,
        Self::Coder,
        Self::Tester,
        Self::Critic,
        Self::Integrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Critic => "critic",
            Self::Integrator => "integrator",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planner" | "architect" => Ok(Self::Planner),
            "coder" => Ok(Self::Coder),
            "tester" => Ok(Self::Tester),
            "critic" | "reviewer" => Ok(Self::Critic),
            "integrator" => Ok(Self::Integrator),
            other => Err(FlowError::Config(format!("Unknown agent role: {}", other))),
        }
    }
}

/// Persona handed to the backend along with the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: AgentRole,
    pub title: String,
    pub goal: String,
}

impl RoleConfig {
    /// Built-in persona for a role
    pub fn for_role(role: AgentRole) -> Self {
        let (title, goal) = match role {
            AgentRole::Planner => (
                "Software Architect",
                "Analyze user requirements and create detailed, actionable specifications",
            ),
            AgentRole::Coder => (
                "Senior Software Engineer",
                "Generate clean, well-documented, production-ready code from specifications",
            ),
            AgentRole::Tester => (
                "QA Engineer & Test Specialist",
                "Review code for issues and create comprehensive test coverage",
            ),
            AgentRole::Critic => (
                "Code Reviewer",
                "Judge whether an implementation is ready to integrate",
            ),
            AgentRole::Integrator => (
                "Integration Engineer",
                "Assemble approved work into a coherent, deployable package",
            ),
        };
        Self {
            role,
            title: title.to_string(),
            goal: goal.to_string(),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Completed,
    Failed,
}

/// The one place where backend output shapes are reconciled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentReturnShape {
    /// Text the parsers still have to decode
    Raw(String),
    Structured(Map<String, Value>),
}

impl AgentReturnShape {
    /// - object with a string `raw` -> `Raw`
    /// - object with `output` -> normalize `output`
    /// - any other object -> `Structured`
    /// - string -> `Raw`
    /// - anything else -> `Raw` of its JSON text
    pub fn normalize(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                if let Some(Value::String(raw)) = map.get("raw") {
                    return Self::Raw(raw.clone());
                }
                match map.remove("output") {
                    Some(inner) => Self::normalize(inner),
                    None => Self::Structured(map),
                }
            }
            Value::String(text) => Self::Raw(text),
            other => Self::Raw(other.to_string()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Raw(text) => Value::String(text),
            Self::Structured(map) => Value::Object(map),
        }
    }

    pub fn to_value(&self) -> Value {
        self.clone().into_value()
    }
}

/// Outcome of one invocation. `output` is present iff `status == Completed`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub role: AgentRole,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentReturnShape>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub simulation: bool,
    pub duration_ms: u64,
}

impl AgentResult {
    fn completed(role: AgentRole, output: AgentReturnShape, simulation: bool, duration_ms: u64) -> Self {
        Self {
            role,
            status: AgentStatus::Completed,
            output: Some(output),
            error: None,
            simulation,
            duration_ms,
        }
    }

    fn failed(role: AgentRole, error: String, simulation: bool, duration_ms: u64) -> Self {
        Self {
            role,
            status: AgentStatus::Failed,
            output: None,
            error: Some(error),
            simulation,
            duration_ms,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AgentStatus::Completed
    }

    /// Output as a JSON value for the parsers
    pub fn output_value(&self) -> Option<Value> {
        self.output.as_ref().map(AgentReturnShape::to_value)
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

// =============================================================================
// Capability
// =============================================================================

/// A backend able to run an agent role
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn invoke(&self, role: &RoleConfig, task: &str) -> Result<Value>;

    /// Backend name for logging
    fn name(&self) -> &str;

    fn is_simulated(&self) -> bool {
        false
    }
}

pub type SharedCapability = Arc<dyn AgentCapability>;

// =============================================================================
// Invoker
// =============================================================================

/// Runs agent roles on spawned workers under a timeout
#[derive(Clone)]
pub struct AgentInvoker {
    capability: SharedCapability,
    timeout: Duration,
    metrics: Option<SharedMetrics>,
}

impl AgentInvoker {
    pub fn new(capability: SharedCapability) -> Self {
        Self {
            capability,
            timeout: TimeoutConfig::default().agent_invocation,
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_simulated(&self) -> bool {
        self.capability.is_simulated()
    }

    pub fn backend_name(&self) -> &str {
        self.capability.name()
    }

    /// Invoke a role outside any run
    pub async fn invoke(&self, role: &RoleConfig, task: &str) -> AgentResult {
        self.invoke_inner(None, role, task).await
    }

    /// Invoke a role on behalf of a run; the run id is carried in the audit record
    pub async fn invoke_for_run(&self, run_id: &RunId, role: &RoleConfig, task: &str) -> AgentResult {
        self.invoke_inner(Some(run_id.as_str()), role, task).await
    }

    async fn invoke_inner(&self, run_id: Option<&str>, role: &RoleConfig, task: &str) -> AgentResult {
        let simulation = self.capability.is_simulated();
        let start = Instant::now();
        debug!(
            "Invoking {} via {} ({} chars)",
            role.role,
            self.capability.name(),
            task.len()
        );

        let capability = Arc::clone(&self.capability);
        let worker_role = role.clone();
        let worker_task = task.to_string();
        let handle =
            tokio::spawn(async move { capability.invoke(&worker_role, &worker_task).await });
        let abort = handle.abort_handle();

        let backend = self.capability.name();
        let operation = format!("{} invocation", role.role);
        let worker_failure = |message: String| {
            let classified = ErrorClassifier::classify(&message, backend);
            (message, classified)
        };
        let outcome = match with_timeout_map(self.timeout, handle, &operation).await {
            Ok(Ok(Ok(value))) => Ok(AgentReturnShape::normalize(value)),
            Ok(Ok(Err(e))) => Err((e.to_string(), ErrorClassifier::classify_flow_error(&e, backend))),
            Ok(Err(join_err)) if join_err.is_panic() => Err(worker_failure(format!(
                "Agent worker panicked during {}",
                operation
            ))),
            Ok(Err(_)) => Err(worker_failure(format!(
                "Agent worker cancelled during {}",
                operation
            ))),
            Err(timeout) => {
                abort.abort();
                Err((timeout.to_string(), ErrorClassifier::classify_flow_error(&timeout, backend)))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let run_id = run_id.unwrap_or("-");

        let result = match outcome {
            Ok(output) => {
                info!(
                    target: AUDIT_TARGET,
                    role = role.role.as_str(),
                    run_id,
                    outcome = "completed",
                    simulation,
                    duration_ms,
                    "agent invocation"
                );
                AgentResult::completed(role.role, output, simulation, duration_ms)
            }
            Err((error, classified)) => {
                warn!(
                    target: AUDIT_TARGET,
                    role = role.role.as_str(),
                    run_id,
                    outcome = "failed",
                    category = %classified.category,
                    simulation,
                    duration_ms,
                    "agent invocation failed: {}",
                    error
                );
                AgentResult::failed(role.role, error, simulation, duration_ms)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_invocation(role.role.as_str(), result.is_completed(), simulation, duration_ms);
        }

        result
    }
}

impl std::fmt::Debug for AgentInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInvoker")
            .field("capability", &self.capability.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::create_shared_metrics;
    use serde_json::json;

    struct FixedCapability(Value);

    #[async_trait]
    impl AgentCapability for FixedCapability {
        async fn invoke(&self, _role: &RoleConfig, _task: &str) -> Result<Value> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingCapability;

    #[async_trait]
    impl AgentCapability for FailingCapability {
        async fn invoke(&self, _role: &RoleConfig, _task: &str) -> Result<Value> {
            Err(FlowError::LlmApi("429 Too Many Requests".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct PanickingCapability;

    #[async_trait]
    impl AgentCapability for PanickingCapability {
        async fn invoke(&self, _role: &RoleConfig, _task: &str) -> Result<Value> {
            panic!("backend exploded");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    struct SlowCapability;

    #[async_trait]
    impl AgentCapability for SlowCapability {
        async fn invoke(&self, _role: &RoleConfig, _task: &str) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({}))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn planner() -> RoleConfig {
        RoleConfig::for_role(AgentRole::Planner)
    }

    #[test]
    fn test_normalize_shapes() {
        assert_eq!(
            AgentReturnShape::normalize(json!({"raw": "{\"a\": 1}", "other": 2})),
            AgentReturnShape::Raw("{\"a\": 1}".to_string())
        );
        assert_eq!(
            AgentReturnShape::normalize(json!({"output": {"output": "text"}})),
            AgentReturnShape::Raw("text".to_string())
        );
        assert_eq!(
            AgentReturnShape::normalize(json!("plain")),
            AgentReturnShape::Raw("plain".to_string())
        );
        assert_eq!(
            AgentReturnShape::normalize(json!([1, 2])),
            AgentReturnShape::Raw("[1,2]".to_string())
        );

        let structured = AgentReturnShape::normalize(json!({"files": [], "raw": 5}));
        assert_eq!(structured.into_value(), json!({"files": [], "raw": 5}));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Architect".parse::<AgentRole>().unwrap(), AgentRole::Planner);
        assert_eq!("critic".parse::<AgentRole>().unwrap(), AgentRole::Critic);
        assert!("painter".parse::<AgentRole>().is_err());
        assert_eq!(RoleConfig::for_role(AgentRole::Coder).title, "Senior Software Engineer");
    }

    #[tokio::test]
    async fn test_invoke_completed() {
        let metrics = create_shared_metrics("test");
        let invoker = AgentInvoker::new(Arc::new(FixedCapability(json!({"output": {"x": 1}}))))
            .with_metrics(Arc::clone(&metrics));

        let result = invoker.invoke(&planner(), "task").await;
        assert!(result.is_completed());
        assert!(!result.simulation);
        assert!(result.error.is_none());
        assert_eq!(result.output_value(), Some(json!({"x": 1})));
        assert_eq!(metrics.snapshot().roles["planner"].invocations, 1);
    }

    #[tokio::test]
    async fn test_invoke_error_becomes_failed_result() {
        let metrics = create_shared_metrics("test");
        let invoker =
            AgentInvoker::new(Arc::new(FailingCapability)).with_metrics(Arc::clone(&metrics));

        let result = invoker.invoke_for_run(&RunId::from("run-1"), &planner(), "task").await;
        assert_eq!(result.status, AgentStatus::Failed);
        assert!(result.output.is_none());
        assert!(result.error_message().contains("429"));
        assert_eq!(metrics.snapshot().failures, 1);
    }

    #[tokio::test]
    async fn test_invoke_panic_becomes_failed_result() {
        let invoker = AgentInvoker::new(Arc::new(PanickingCapability));
        let result = invoker.invoke(&planner(), "task").await;
        assert_eq!(result.status, AgentStatus::Failed);
        assert!(result.error_message().contains("panicked"));
    }

    #[tokio::test]
    async fn test_invoke_timeout_becomes_failed_result() {
        let invoker =
            AgentInvoker::new(Arc::new(SlowCapability)).with_timeout(Duration::from_millis(20));
        let result = invoker.invoke(&planner(), "task").await;
        assert_eq!(result.status, AgentStatus::Failed);
        assert!(result.error_message().contains("planner invocation"));
    }
}
