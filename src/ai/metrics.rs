//! Agent Invocation Metrics
//!
//! Aggregates agent calls, failures, simulated calls, token usage and cost
//! across runs. Thread-safe for concurrent batch execution.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = create_shared_metrics("batch-42");
//! metrics.record_invocation("coder", true, false, 1200);
//! metrics.record_response(&response);
//! println!("{}", metrics.summary().display());
//! ```

use crate::ai::provider::LlmResponse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

// =============================================================================
// Metrics Collector
// =============================================================================

/// Atomics for the hot counters, an RwLock for the per-role breakdown.
pub struct MetricsCollector {
    session_id: String,
    start_time: Instant,
    invocations: AtomicU32,
    failures: AtomicU32,
    simulated: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
    /// Stored as microdollars for atomic ops
    total_cost_micros: AtomicU64,
    roles: RwLock<BTreeMap<String, RoleMetrics>>,
}

/// Per-role counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMetrics {
    pub invocations: u32,
    pub failures: u32,
    pub simulated: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub session_id: String,
    pub total_duration_ms: u64,
    pub invocations: u32,
    pub failures: u32,
    pub simulated: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub roles: BTreeMap<String, RoleMetrics>,
}

impl MetricsCollector {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_time: Instant::now(),
            invocations: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            simulated: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
            roles: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record one agent invocation outcome
    pub fn record_invocation(&self, role: &str, success: bool, simulation: bool, duration_ms: u64) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if simulation {
            self.simulated.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms
            .fetch_add(duration_ms, Ordering::Relaxed);

        let mut roles = self.roles.write().unwrap_or_else(|poisoned| {
            tracing::error!("Metrics roles RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        let entry = roles.entry(role.to_string()).or_default();
        entry.invocations += 1;
        entry.duration_ms += duration_ms;
        if !success {
            entry.failures += 1;
        }
        if simulation {
            entry.simulated += 1;
        }
    }

    /// Record token usage and cost from a live provider response
    pub fn record_response(&self, response: &LlmResponse) {
        self.input_tokens
            .fetch_add(response.usage.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(response.usage.output_tokens as u64, Ordering::Relaxed);

        let cost_micros = (response.cost_usd * 1_000_000.0) as u64;
        self.total_cost_micros
            .fetch_add(cost_micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSummary {
        let invocations = self.invocations.load(Ordering::Relaxed);
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        let avg_latency = if invocations > 0 {
            total_latency as f64 / invocations as f64
        } else {
            0.0
        };

        let roles = self
            .roles
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Metrics roles RwLock poisoned on read, recovering");
                poisoned.into_inner()
            })
            .clone();

        MetricsSummary {
            session_id: self.session_id.clone(),
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
            invocations,
            failures: self.failures.load(Ordering::Relaxed),
            simulated: self.simulated.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            avg_latency_ms: avg_latency,
            total_cost_usd: self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            roles,
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        self.snapshot()
    }
}

impl MetricsSummary {
    /// Format summary for display
    pub fn display(&self) -> String {
        let mut out = format!(
            "Session: {}\n\
             Duration: {:.1}s\n\
             Agent Calls: {} ({} failed, {} simulated)\n\
             Tokens: {} (input: {}, output: {})\n\
             Avg Latency: {:.0}ms\n\
             Cost: ${:.4}",
            self.session_id,
            self.total_duration_ms as f64 / 1000.0,
            self.invocations,
            self.failures,
            self.simulated,
            self.total_tokens,
            self.input_tokens,
            self.output_tokens,
            self.avg_latency_ms,
            self.total_cost_usd
        );
        for (role, m) in &self.roles {
            out.push_str(&format!(
                "\n  {:<10} {} calls, {} failed, {}ms",
                role, m.invocations, m.failures, m.duration_ms
            ));
        }
        out
    }
}

// =============================================================================
// Shared Type
// =============================================================================

pub type SharedMetrics = Arc<MetricsCollector>;

pub fn create_shared_metrics(session_id: impl Into<String>) -> SharedMetrics {
    Arc::new(MetricsCollector::new(session_id))
}

// =============================================================================
// Tests
// =============================================================================
