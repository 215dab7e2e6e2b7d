//! Track command handler: live progress for one run.

use crate::error::{Result, RunwatchError};
use crate::output::print_interrupted;
use crate::progress::RunProgressBar;
use crate::signal::SignalHandler;
use crate::tracker::{RunTracker, TrackerPhase};
use std::time::Duration;

use super::CommandContext;

const RENDER_INTERVAL: Duration = Duration::from_millis(200);

/// Follow `id` until it reaches a terminal state or the user interrupts.
///
/// Returns the final phase. An interrupt stops local tracking only; the
/// run itself is left alone.
pub fn track_command(
    ctx: &CommandContext,
    id: &str,
    signal: &SignalHandler,
) -> Result<TrackerPhase> {
    if ctx.store.get(id).is_none() {
        let _ = ctx.store.refresh_run(id);
    }
    let run = ctx
        .store
        .get(id)
        .ok_or_else(|| RunwatchError::UnknownRun(id.to_string()))?;

    let mut tracker = RunTracker::spawn(ctx.store.clone(), id, ctx.config.tracker_config())?;
    let mut bar = RunProgressBar::new(&format!("{} {}", run.tool, run.id));

    loop {
        let view = tracker.view();
        if view.phase.is_terminal() || tracker.is_finished() {
            bar.finish(&view);
            return Ok(view.phase);
        }
        bar.update(&view);
        if signal.wait(RENDER_INTERVAL) {
            tracker.stop();
            bar.abandon();
            print_interrupted("tracking");
            return Ok(tracker.view().phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::context;
    use crate::run::{NewRun, RunStatus, Tool};
    use crate::test_utils::FakeServer;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_track_until_done() {
        let server = Arc::new(FakeServer::new());
        server.push_status("r1", json!({"phase": "optimizing", "percent": 40}));
        server.push_status("r1", json!({"phase": "done", "percent": 100}));
        let (mut ctx, _dir) = context(server);
        ctx.config.tracker.poll_interval_ms = 10;
        ctx.config.tracker.tick_interval_ms = 10;
        ctx.store
            .register_run(NewRun::started("r1", Tool::LabelingOptimizer))
            .unwrap();

        let phase = track_command(&ctx, "r1", &SignalHandler::detached()).unwrap();

        assert_eq!(phase, TrackerPhase::Succeeded);
        assert_eq!(ctx.store.get("r1").unwrap().status, RunStatus::Succeeded);
    }

    #[test]
    fn test_track_interrupt_leaves_run_running() {
        let server = Arc::new(FakeServer::new());
        server.push_status("r1", json!({"phase": "running"}));
        let (ctx, _dir) = context(server);
        ctx.store.register_run(NewRun::started("r1", Tool::Trainer)).unwrap();
        let signal = SignalHandler::detached();
        let remote = signal.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.request_shutdown();
        });

        let phase = track_command(&ctx, "r1", &signal).unwrap();
        stopper.join().unwrap();

        assert_eq!(phase, TrackerPhase::Running);
        assert_eq!(ctx.store.get("r1").unwrap().status, RunStatus::Running);
        // tracker claim released
        assert!(ctx.store.claim_tracker("r1").is_ok());
    }

    #[test]
    fn test_track_unknown_run() {
        let (ctx, _dir) = context(Arc::new(FakeServer::new()));
        assert!(matches!(
            track_command(&ctx, "ghost", &SignalHandler::detached()),
            Err(RunwatchError::UnknownRun(_))
        ));
    }
}
