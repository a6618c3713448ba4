//! Event Notification
//!
//! Workflow code only sees [`EventPublisher`]; publishing is fire-and-forget
//! from its point of view. [`EventBus`] persists every event and fans it out
//! to in-process subscribers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::ai::with_timeout;
use crate::constants::events::CHANNEL_CAPACITY;
use crate::storage::{EventRecord, SharedDatabase};
use crate::types::Result;

pub const WORKFLOW_STARTED: &str = "workflow_started";
pub const WORKFLOW_AWAITING_APPROVAL: &str = "workflow_awaiting_approval";
pub const WORKFLOW_NEEDS_REFINEMENT: &str = "workflow_needs_refinement";
pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
pub const WORKFLOW_FAILED: &str = "workflow_failed";
pub const CRITIC_APPROVED: &str = "critic_approved";
pub const CRITIC_ESCALATED: &str = "critic_escalated";
pub const CRITIC_DEGRADED: &str = "critic_degraded";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_event(&self, project_id: &str, event_type: &str, payload: Value) -> Result<()>;
}

pub type SharedPublisher = Arc<dyn EventPublisher>;

/// Persisting broadcast bus
pub struct EventBus {
    db: SharedDatabase,
    sender: broadcast::Sender<EventRecord>,
}

impl EventBus {
    pub fn new(db: SharedDatabase) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { db, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn recent_events(&self, project_id: &str, limit: usize) -> Result<Vec<EventRecord>> {
        self.db.recent_events(project_id, limit)
    }

    /// Subscribe to the events of one project. Events published before this
    /// call are only in [`recent_events`](Self::recent_events).
    pub fn subscribe_project(&self, project_id: &str) -> ProjectEvents {
        ProjectEvents {
            project_id: project_id.to_string(),
            receiver: self.subscribe(),
        }
    }
}

/// Whether an event marks a run settling (finished or suspended)
pub fn is_settled_event(event: &EventRecord) -> bool {
    matches!(
        event.event_type.as_str(),
        WORKFLOW_COMPLETED | WORKFLOW_FAILED | WORKFLOW_AWAITING_APPROVAL | WORKFLOW_NEEDS_REFINEMENT
    )
}

/// Broadcast receiver filtered to one project
pub struct ProjectEvents {
    project_id: String,
    receiver: broadcast::Receiver<EventRecord>,
}

impl ProjectEvents {
    /// Await the next event matching `predicate`.
    ///
    /// `Ok(None)` once the bus is gone; `FlowError::Timeout` if nothing
    /// matching arrives in time.
    pub async fn next_matching<P>(&mut self, predicate: P, timeout: Duration) -> Result<Option<EventRecord>>
    where
        P: Fn(&EventRecord) -> bool,
    {
        let project_id = self.project_id.as_str();
        let receiver = &mut self.receiver;
        with_timeout(
            timeout,
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if event.project_id == project_id && predicate(&event) => {
                            return Ok(Some(event));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Event subscriber lagged, skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(None),
                    }
                }
            },
            "wait for event",
        )
        .await
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish_event(&self, project_id: &str, event_type: &str, payload: Value) -> Result<()> {
        let event = self.db.insert_event(project_id, event_type, &payload)?;
        debug!("Published {} for project {}", event_type, project_id);
        // No subscribers is normal
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::FlowError;
    use serde_json::json;

    fn bus() -> Arc<EventBus> {
        let db = Arc::new(Database::open_in_memory_initialized().unwrap());
        Arc::new(EventBus::new(db))
    }

    #[tokio::test]
    async fn test_publish_persists_and_broadcasts() {
        let bus = bus();
        let mut receiver = bus.subscribe();

        bus.publish_event("proj", WORKFLOW_STARTED, json!({"workflow_id": "r1"}))
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, WORKFLOW_STARTED);
        assert_eq!(bus.recent_events("proj", 5).unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_project_events_match_project_and_predicate() {
        let bus = bus();
        let mut events = bus.subscribe_project("proj");

        // Published before anyone awaits; the subscription still sees them
        bus.publish_event("other", WORKFLOW_COMPLETED, json!({}))
            .await
            .unwrap();
        bus.publish_event("proj", WORKFLOW_STARTED, json!({}))
            .await
            .unwrap();
        bus.publish_event("proj", WORKFLOW_FAILED, json!({"workflow_id": "r1"}))
            .await
            .unwrap();

        let event = events
            .next_matching(is_settled_event, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, WORKFLOW_FAILED);
        assert_eq!(event.payload["workflow_id"], "r1");
    }

    #[tokio::test]
    async fn test_project_events_time_out() {
        let bus = bus();
        let mut events = bus.subscribe_project("proj");
        let err = events
            .next_matching(|_| true, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_project_events_end_with_bus() {
        let bus = bus();
        let mut events = bus.subscribe_project("proj");
        drop(bus);
        let next = events
            .next_matching(|_| true, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
