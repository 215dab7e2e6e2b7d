//! Status, history, and route command handlers.

use crate::error::{Result, RunwatchError};
use crate::output::{print_run_detail, print_run_table, print_warning, GRAY, RESET};
use crate::run::now_secs;

use super::CommandContext;

/// Refresh active runs once, then list every known run, newest first.
///
/// A failed refresh is reported but the locally known runs are still shown.
pub fn status_command(ctx: &CommandContext) -> Result<()> {
    if let Err(e) = ctx.store.refresh_active_runs() {
        print_warning(&format!(
            "Could not reach {} ({}); showing last known state",
            ctx.config.server.base_url, e
        ));
    }
    let runs = ctx.store.runs_newest_first();
    print_run_table("Runs", &runs, now_secs());
    Ok(())
}

/// Pull recent runs from the server into the store and list them.
pub fn history_command(ctx: &CommandContext, limit: usize) -> Result<()> {
    ctx.store.refresh_history(limit)?;
    let runs: Vec<_> = ctx
        .store
        .runs_newest_first()
        .into_iter()
        .take(limit)
        .collect();
    print_run_table("Recent runs", &runs, now_secs());
    Ok(())
}

/// Print where a run's result can be viewed.
pub fn route_command(ctx: &CommandContext, id: &str, details: bool) -> Result<()> {
    if ctx.store.get(id).is_none() {
        // Not tracked locally yet; the server may still know it.
        if let Err(e) = ctx.store.refresh_run(id) {
            println!("{GRAY}Server lookup failed: {}{RESET}", e);
        }
    }
    let run = ctx
        .store
        .get(id)
        .ok_or_else(|| RunwatchError::UnknownRun(id.to_string()))?;
    if details {
        print_run_detail(&run, now_secs());
    } else {
        println!("{}", ctx.store.get_run_route(&run));
    }
    Ok(())
}
