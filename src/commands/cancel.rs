//! Cancel and clear-history command handlers.

use crate::error::{Result, RunwatchError};
use crate::output::{print_info, print_success};
use crate::run::RunRecord;

use super::CommandContext;

/// Cancel a run. The server is asked when the tool supports it; the run is
/// recorded as cancelled locally either way.
pub fn cancel_command(ctx: &CommandContext, id: &str) -> Result<RunRecord> {
    let run = ctx
        .store
        .get(id)
        .ok_or_else(|| RunwatchError::UnknownRun(id.to_string()))?;
    if run.status.is_terminal() {
        print_info(&format!("Run {} already finished ({})", id, run.status.as_str()));
        return Ok(run);
    }
    let cancelled = ctx.store.cancel_run(id)?;
    print_success(&format!("Cancelled {} run {}", cancelled.tool, cancelled.id));
    Ok(cancelled)
}

/// Forget every tracked run.
pub fn clear_history_command(ctx: &CommandContext) -> Result<()> {
    let count = ctx.store.snapshot().runs_by_id.len();
    ctx.store.clear_run_history()?;
    print_success(&format!(
        "Cleared {} run{} from history",
        count,
        if count == 1 { "" } else { "s" }
    ));
    Ok(())
}
