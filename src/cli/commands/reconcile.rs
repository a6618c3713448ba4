//! Reconcile Command
//!
//! Fail stages left `active` past the stage timeout, once or on an
//! interval until Ctrl-C.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::cli::CommandContext;
use crate::cli::ui::{Output, OutputFormat, print_json};
use crate::constants::workflow::RECONCILE_INTERVAL_SECS;
use crate::types::Result;

pub async fn run(timeout_secs: Option<u64>, watch_mode: bool, format: OutputFormat) -> Result<()> {
    let ctx = CommandContext::load()?;
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.timeouts().stage);
    let reconciler = ctx.reconciler(timeout);

    if watch_mode {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping reconciler");
                let _ = shutdown_tx.send(true);
            }
        });

        Output::new().info(&format!(
            "Reconciling every {}s (stage timeout {}s); Ctrl-C to stop",
            RECONCILE_INTERVAL_SECS,
            timeout.as_secs()
        ));
        reconciler
            .run_periodic(Duration::from_secs(RECONCILE_INTERVAL_SECS), shutdown_rx)
            .await;
        return Ok(());
    }

    let reconciled = reconciler.reconcile_once(timeout).await?;
    let out = Output::new();
    match format {
        OutputFormat::Text if reconciled.is_empty() => out.success("No stale stages"),
        OutputFormat::Text => {
            for stage in &reconciled {
                let run_note = if stage.run_failed { ", run failed" } else { "" };
                out.warning(&format!(
                    "{} stage {} of run {} timed out{}",
                    stage.stage_type, stage.stage_id, stage.run_id, run_note
                ));
            }
            out.info(&format!("Reconciled {} stages", reconciled.len()));
        }
        _ => print_json(&reconciled)?,
    }
    Ok(())
}
