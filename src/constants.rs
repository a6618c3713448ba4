//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Workflow pipeline constants
pub mod workflow {
    /// Maximum coder/tester iterations before a run fails
    pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

    /// Maximum critic review iterations before escalation
    pub const DEFAULT_MAX_CRITIC_ITERATIONS: u32 = 3;

    /// A stage left `active` longer than this is reconciled as failed (seconds)
    pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 1800;

    /// Concurrent runs in a batch
    pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

    /// Interval between background reconciliation passes (seconds)
    pub const RECONCILE_INTERVAL_SECS: u64 = 60;

    /// Review criteria handed to the critic
    pub const CRITIC_CRITERIA: &[&str] = &[
        "correctness",
        "completeness",
        "quality",
        "tests",
        "security",
    ];
}

/// Prompt quality gate constants
pub mod prompt {
    pub const MIN_LENGTH: usize = 50;
    pub const RECOMMENDED_LENGTH: usize = 200;
    pub const MAX_LENGTH: usize = 5000;

    /// Question marks above this count produce an ambiguity warning
    pub const MAX_QUESTIONS: usize = 3;

    /// Word count that alone makes a prompt "specific"
    pub const SPECIFIC_WORD_COUNT: usize = 40;

    /// Maximum extracted features
    pub const MAX_FEATURES: usize = 10;

    /// Maximum extracted constraints
    pub const MAX_CONSTRAINTS: usize = 5;

    /// Score penalties
    pub mod penalty {
        pub const TOO_SHORT: i32 = 40;
        pub const SHORT: i32 = 15;
        pub const NO_PURPOSE: i32 = 20;
        pub const NO_FEATURES: i32 = 20;
        pub const NO_TECH: i32 = 10;
        pub const VAGUE: i32 = 10;
    }
}

/// Agent invocation constants
pub mod agent {
    /// User input above this size is truncated before reaching an agent
    pub const MAX_USER_INPUT_CHARS: usize = 10_000;

    /// Planner prompt excerpt length in simulated output
    pub const SIMULATION_PROMPT_EXCERPT: usize = 100;
}

/// HTTP/Network constants
pub mod network {
    /// Default LLM request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}

/// Event bus constants
pub mod events {
    /// Broadcast channel capacity; lagging subscribers skip older events
    pub const CHANNEL_CAPACITY: usize = 256;
}
