//! In-process cancellation flags for runs currently executing.
//!
//! The `canceled` column on the run row is the durable flag; the registry
//! lets a cancel reach a run in this process without a database read.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::types::RunId;

#[derive(Debug, Default)]
pub struct RunRegistry {
    flags: DashMap<String, Arc<AtomicBool>>,
}

pub type SharedRegistry = Arc<RunRegistry>;

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a run; an existing flag (and a pending cancel) is kept.
    pub fn register(&self, run_id: &RunId) -> Arc<AtomicBool> {
        Arc::clone(
            self.flags
                .entry(run_id.as_str().to_string())
                .or_insert_with(|| Arc::new(AtomicBool::new(false)))
                .value(),
        )
    }

    pub fn unregister(&self, run_id: &RunId) {
        self.flags.remove(run_id.as_str());
    }

    /// Returns false if the run is not executing here
    pub fn cancel(&self, run_id: &RunId) -> bool {
        match self.flags.get(run_id.as_str()) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, run_id: &RunId) -> bool {
        self.flags
            .get(run_id.as_str())
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}
