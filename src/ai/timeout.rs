//! Unified Timeout Configuration
//!
//! Operation-specific timeout defaults plus a helper for wrapping async
//! operations with a consistent `FlowError::Timeout`.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::{TimeoutConfig, with_timeout};
//!
//! let config = TimeoutConfig::default();
//! let value = with_timeout(
//!     config.agent_invocation,
//!     async { capability.invoke(&role, &task).await },
//!     "planner invocation"
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::constants::{network as net_constants, workflow as wf_constants};
use crate::types::{FlowError, Result};

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// One agent call, including any live provider round-trip (default: 5 minutes)
    pub agent_invocation: Duration,
    /// Timeout for database operations (default: 30 seconds)
    pub database: Duration,
    /// Timeout for network connections (default: 30 seconds)
    pub connection: Duration,
    /// An `active` stage older than this is considered abandoned (default: 30 minutes)
    pub stage: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            agent_invocation: Duration::from_secs(net_constants::DEFAULT_TIMEOUT_SECS),
            database: Duration::from_secs(30),
            connection: Duration::from_secs(net_constants::CONNECTION_TIMEOUT_SECS),
            stage: Duration::from_secs(wf_constants::DEFAULT_STAGE_TIMEOUT_SECS),
        }
    }
}

impl TimeoutConfig {
    /// Derive timeouts from loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            agent_invocation: Duration::from_secs(config.llm.timeout_secs),
            stage: Duration::from_secs(config.workflow.stage_timeout_secs),
            ..Self::default()
        }
    }

    /// Short timeouts for tests and dry runs
    pub fn fast() -> Self {
        Self {
            agent_invocation: Duration::from_secs(10),
            database: Duration::from_secs(5),
            connection: Duration::from_secs(5),
            stage: Duration::from_secs(60),
        }
    }
}

/// Execute an async operation with a timeout
///
/// Returns `FlowError::Timeout` naming `operation_name` if the operation
/// doesn't complete within `timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(FlowError::timeout(operation_name, timeout)),
    }
}

/// Like `with_timeout`, for futures that don't return a `Result`
pub async fn with_timeout_map<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(FlowError::timeout(operation_name, timeout)),
    }
}
