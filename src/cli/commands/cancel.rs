//! Cancel Command
//!
//! Sets the run's durable cancel flag; the pipeline honors it before its
//! next stage starts.

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::types::{Result, RunId};

pub fn run(run_id: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let run_id = RunId::from(run_id);
    let run = ctx.db.require_run(&run_id)?;
    let out = Output::new();

    if !ctx.db.request_cancel(&run_id)? {
        out.warning(&format!("Run {} already {}; nothing to cancel", run_id, run.status));
        return Ok(());
    }
    // Reaches runs executing in this process; others see the stored flag
    ctx.registry.cancel(&run_id);
    out.success(&format!("Cancellation requested for run {}", run_id));
    Ok(())
}
