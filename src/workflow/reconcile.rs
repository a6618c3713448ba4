//! Stale stage reconciliation.
//!
//! A crash or hung agent leaves its stage `active`. Anything active past the
//! stage timeout is failed so the run shows an actionable status.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::events::{SharedPublisher, WORKFLOW_FAILED};
use crate::storage::{SharedDatabase, StageKind, StageStatus, TaskStatus};
use crate::types::{FlowError, Result, RunId, StageId, log_filter_warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReconciledStage {
    pub stage_id: StageId,
    pub run_id: RunId,
    pub stage_type: StageKind,
    /// The run was still `running` and is now `failed`
    pub run_failed: bool,
}

pub struct Reconciler {
    db: SharedDatabase,
    events: SharedPublisher,
    stage_timeout: Duration,
}

impl Reconciler {
    pub fn new(db: SharedDatabase, events: SharedPublisher, stage_timeout: Duration) -> Self {
        Self {
            db,
            events,
            stage_timeout,
        }
    }

    /// Fail every stage `active` for longer than `timeout`
    pub async fn reconcile_once(&self, timeout: Duration) -> Result<Vec<ReconciledStage>> {
        let age = chrono::Duration::from_std(timeout)
            .map_err(|e| FlowError::Config(format!("Invalid stage timeout: {}", e)))?;
        let cutoff = Utc::now() - age;

        let mut reconciled = Vec::new();
        for stage in self.db.active_stages_older_than(cutoff)? {
            let kind = stage.stage_type;
            let error = format!(
                "Stage {} timed out after {}s; retry from {}",
                kind,
                timeout.as_secs(),
                kind
            );

            match self.db.complete_stage(
                &stage.id,
                StageStatus::Failed,
                Some(&json!({"error": error, "reconciled": true})),
            ) {
                Ok(()) => {}
                // Finished between the scan and the update
                Err(FlowError::StageState(_)) => continue,
                Err(e) => return Err(e),
            }

            let run_failed = self
                .db
                .fail_run_if_running(&stage.run_id, kind.as_str(), &error)?;
            warn!("Reconciled stale {} stage {} of run {}", kind, stage.id, stage.run_id);

            if run_failed && let Some(run) = self.db.get_run(&stage.run_id)? {
                if let Some(task) = &run.task_id {
                    log_filter_warn(
                        self.db.set_task_status(task, TaskStatus::Failed),
                        "Failed to update task status",
                    );
                }
                if let Err(e) = self
                    .events
                    .publish_event(
                        &run.project_id,
                        WORKFLOW_FAILED,
                        json!({
                            "workflow_id": run.id,
                            "stage": kind,
                            "error": error,
                            "reconciled": true,
                        }),
                    )
                    .await
                {
                    warn!("Failed to publish {} event: {}", WORKFLOW_FAILED, e);
                }
            }

            reconciled.push(ReconciledStage {
                stage_id: stage.id,
                run_id: stage.run_id,
                stage_type: kind,
                run_failed,
            });
        }

        if !reconciled.is_empty() {
            info!("Reconciled {} stale stages", reconciled.len());
        }
        Ok(reconciled)
    }

    /// Reconcile every `interval` until `shutdown` flips to true or its sender drops.
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile_once(self.stage_timeout).await {
                        Ok(stages) => debug!("Reconcile pass: {} stages", stages.len()),
                        Err(e) => warn!("Reconcile pass failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciler stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewRun, WorkflowStatus};
    use crate::workflow::testing::Harness;
    use std::sync::Arc;

    fn backdate(harness: &Harness, stage_id: &StageId, secs: i64) {
        let started = (Utc::now() - chrono::Duration::seconds(secs))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        harness
            .db
            .execute(
                "UPDATE workflow_stages SET started_at = ?2 WHERE id = ?1",
                &[&stage_id.as_str(), &started],
            )
            .unwrap();
    }

    fn running_run(harness: &Harness, task_id: Option<&str>) -> RunId {
        let run_id = RunId::generate();
        harness
            .db
            .create_run(&NewRun {
                id: &run_id,
                project_id: "proj",
                task_id,
                original_prompt: "prompt",
                iteration: 1,
            })
            .unwrap();
        run_id
    }

    #[tokio::test]
    async fn test_reconcile_fails_stale_stage_and_run() {
        let harness = Harness::new();
        let task_id = harness.db.create_task("proj", "Stale").unwrap();
        let run_id = running_run(&harness, Some(&task_id));
        let stale = harness.db.begin_stage(&run_id, StageKind::Coder, 1).unwrap();
        backdate(&harness, &stale, 120);

        let fresh_run = running_run(&harness, None);
        let fresh = harness.db.begin_stage(&fresh_run, StageKind::Planner, 1).unwrap();

        let reconciler = harness.reconciler(Duration::from_secs(60));
        let reconciled = reconciler.reconcile_once(Duration::from_secs(60)).await.unwrap();

        assert_eq!(reconciled.len(), 1);
        assert_eq!(reconciled[0].stage_id, stale);
        assert!(reconciled[0].run_failed);

        let stage = harness.db.get_stage(&stale).unwrap().unwrap();
        assert_eq!(stage.status, StageStatus::Failed);
        assert_eq!(stage.output.as_ref().unwrap()["reconciled"], true);

        let run = harness.db.require_run(&run_id).unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(
            run.last_error.as_deref(),
            Some("Stage coder timed out after 60s; retry from coder")
        );
        assert_eq!(
            harness.db.get_task(&task_id).unwrap().unwrap().status,
            TaskStatus::Failed
        );
        assert_eq!(
            harness.db.get_stage(&fresh).unwrap().unwrap().status,
            StageStatus::Active
        );

        let events = harness.bus.recent_events("proj", 5).unwrap();
        assert_eq!(events[0].event_type, WORKFLOW_FAILED);

        // Nothing left to do
        assert!(reconciler.reconcile_once(Duration::from_secs(60)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_leaves_suspended_run_status() {
        let harness = Harness::new();
        let run_id = running_run(&harness, None);
        harness
            .db
            .update_run_status(
                &run_id,
                &crate::storage::RunUpdate {
                    status: WorkflowStatus::AwaitingApproval,
                    iteration: 1,
                    last_stage: Some("planner"),
                    last_error: None,
                },
            )
            .unwrap();
        let stale = harness.db.begin_stage(&run_id, StageKind::Critic, 1).unwrap();
        backdate(&harness, &stale, 600);

        let reconciled = harness
            .reconciler(Duration::from_secs(60))
            .reconcile_once(Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(reconciled.len(), 1);
        assert!(!reconciled[0].run_failed);
        assert_eq!(
            harness.db.require_run(&run_id).unwrap().status,
            WorkflowStatus::AwaitingApproval
        );
    }

    #[tokio::test]
    async fn test_run_periodic_stops_on_shutdown() {
        let harness = Harness::new();
        let reconciler = Arc::new(harness.reconciler(Duration::from_secs(60)));
        let (tx, rx) = watch::channel(false);

        let worker = Arc::clone(&reconciler);
        let handle = tokio::spawn(async move {
            worker.run_periodic(Duration::from_millis(10), rx).await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
