//! Watch command handler: the running-jobs banner.

use crate::dismissal::DismissalSet;
use crate::error::Result;
use crate::output::status::format_banner;
use crate::output::{print_interrupted, print_warning};
use crate::output::{GRAY, RESET};
use crate::poller::ActivePoller;
use crate::signal::SignalHandler;
use crate::store::{StoreEvent, StoreSnapshot};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tracing::warn;

use super::CommandContext;

const EVENT_WAIT: Duration = Duration::from_millis(250);

/// Start the poller and redraw the banner whenever the visible runs change,
/// until Ctrl+C.
pub fn watch_command(ctx: &CommandContext, signal: &SignalHandler) -> Result<()> {
    if let Err(e) = ctx.store.server().health() {
        print_warning(&format!(
            "{} is not reachable ({}); polling will keep retrying",
            ctx.config.server.base_url, e
        ));
    }
    let events = ctx.store.subscribe();
    let mut dismissals = ctx.dismissals()?;
    let mut poller = ActivePoller::start(ctx.store.clone(), ctx.config.poller_config())?;
    let mut last_frame: Option<String> = None;

    render(&mut dismissals, &ctx.store.snapshot(), &mut last_frame);

    while !signal.is_shutdown_requested() {
        match events.recv_timeout(EVENT_WAIT) {
            Ok(event) => {
                if matches!(event, StoreEvent::Cleared) {
                    last_frame = None;
                }
                // Coalesce bursts into one redraw.
                for _ in events.try_iter() {}
            }
            Err(RecvTimeoutError::Timeout) => {
                // Runs and dismissals may have been written by another process.
                if let Err(e) = ctx.store.sync_from_storage() {
                    warn!(error = %e, "Failed to sync run store");
                }
                if let Err(e) = dismissals.reload() {
                    warn!(error = %e, "Failed to reload dismissals");
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        render(&mut dismissals, &ctx.store.snapshot(), &mut last_frame);
    }

    poller.stop();
    if signal.is_shutdown_requested() {
        print_interrupted("watching");
    }
    Ok(())
}

/// Auto-clear expired dismissals, then print the banner if it changed.
/// Returns the frame that is now on screen.
fn render(
    dismissals: &mut DismissalSet,
    snapshot: &StoreSnapshot,
    last_frame: &mut Option<String>,
) -> String {
    if let Err(e) = dismissals.reconcile(snapshot) {
        warn!(error = %e, "Failed to auto-clear dismissals");
    }
    let frame = format_banner(&dismissals.visible_runs(snapshot))
        .unwrap_or_else(|| format!("{GRAY}No jobs running.{RESET}"));
    if last_frame.as_deref() != Some(frame.as_str()) {
        println!("{}", frame);
        println!();
        *last_frame = Some(frame.clone());
    }
    frame
}
