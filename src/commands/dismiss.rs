//! Dismiss and session command handlers.

use crate::error::Result;
use crate::output::{print_info, print_success, print_warning};

use super::CommandContext;

/// Hide runs from this session's banner. Their records are untouched.
pub fn dismiss_command(ctx: &CommandContext, ids: &[String]) -> Result<()> {
    for id in ids {
        match ctx.store.get(id) {
            None => print_warning(&format!("Run {} is not tracked; dismissing anyway", id)),
            Some(run) if !run.is_active() => print_info(&format!(
                "Run {} is already {}; it is not on the banner",
                id,
                run.status.as_str()
            )),
            Some(_) => {}
        }
    }
    let mut dismissals = ctx.dismissals()?;
    dismissals.dismiss(ids.iter().cloned())?;
    // Drop ids that would never show anyway.
    dismissals.reconcile(&ctx.store.snapshot())?;
    print_success(&format!(
        "Dismissed {} run{} for session '{}'",
        ids.len(),
        if ids.len() == 1 { "" } else { "s" },
        ctx.session
    ));
    Ok(())
}

/// End the session: forget all of its dismissals.
pub fn session_end_command(ctx: &CommandContext) -> Result<()> {
    let mut dismissals = ctx.dismissals()?;
    let count = dismissals.len();
    dismissals.clear()?;
    print_success(&format!(
        "Ended session '{}' ({} dismissal{} cleared)",
        ctx.session,
        count,
        if count == 1 { "" } else { "s" }
    ));
    Ok(())
}
