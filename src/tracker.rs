//! Per-run progress tracking.
//!
//! [`ProgressTracker`] is the clock-injected state machine that reconciles
//! server-reported progress with a locally animated estimate. [`RunTracker`]
//! owns the thread that feeds it: one status poll every `poll_interval`, one
//! tick every `tick_interval`, store writes for every authoritative
//! observation.

use crate::error::{Result, RunwatchError};
use crate::normalize::{normalize_status, Phase, ToolStatus};
use crate::run::{FailureReason, RunRecord, RunStatus};
use crate::store::{RunStore, TrackerClaim, CANCELLED_MESSAGE, STALE_MESSAGE};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const PROGRESS_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    /// Percentage points added per tick while animating.
    pub animation_step: f64,
    /// Animated progress always stays strictly below this percentage.
    pub animation_cap: f64,
    /// Unchanged display for this long switches to the indeterminate indicator.
    pub stuck_after: Duration,
    pub max_poll_attempts: u32,
    pub max_consecutive_errors: u32,
    /// Server elapsed figures closer than this to the local clock are ignored.
    pub elapsed_drift_tolerance: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            tick_interval: Duration::from_secs(1),
            animation_step: 2.0,
            animation_cap: 90.0,
            stuck_after: Duration::from_secs(3),
            max_poll_attempts: 60,
            max_consecutive_errors: 5,
            elapsed_drift_tolerance: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Determinate,
    /// Alive, but no new information recently.
    Indeterminate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerPhase {
    Running,
    Succeeded,
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl TrackerPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackerPhase::Running)
    }

    pub fn status(&self) -> RunStatus {
        match self {
            TrackerPhase::Running => RunStatus::Running,
            TrackerPhase::Succeeded => RunStatus::Succeeded,
            TrackerPhase::Failed { reason, .. } => RunStatus::Failed(*reason),
        }
    }
}

/// What a poll did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Server progress adopted.
    Progress,
    /// No usable progress; local estimate in use.
    Estimating,
    /// The poll failed but the tracker keeps going.
    Error,
    /// The tracker reached a terminal phase with this poll.
    Finished,
    /// The tracker was already terminal or stopped; nothing changed.
    Ignored,
}

/// Render-ready state of one tracked run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView {
    pub run_id: String,
    /// Percentage in `[0,100]`.
    pub display_progress: f64,
    pub server_progress: Option<f64>,
    pub indicator: Indicator,
    pub phase: TrackerPhase,
    pub stage: String,
    pub message: String,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct ProgressTracker {
    run_id: String,
    config: TrackerConfig,
    server_progress: Option<f64>,
    display_progress: f64,
    animating: bool,
    last_step_at: Instant,
    last_change_at: Instant,
    indicator: Indicator,
    phase: TrackerPhase,
    stopped: bool,
    poll_attempts: u32,
    consecutive_errors: u32,
    started_at: Instant,
    final_elapsed: Option<Duration>,
    stage: String,
    message: String,
}

impl ProgressTracker {
    pub fn new(run_id: impl Into<String>, config: TrackerConfig, now: Instant) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            server_progress: None,
            display_progress: 0.0,
            animating: false,
            last_step_at: now,
            last_change_at: now,
            indicator: Indicator::Determinate,
            phase: TrackerPhase::Running,
            stopped: false,
            poll_attempts: 0,
            consecutive_errors: 0,
            started_at: now,
            final_elapsed: None,
            stage: String::new(),
            message: String::new(),
        }
    }

    /// Seed a tracker from what the store already knows about the run.
    pub fn from_record(run: &RunRecord, config: TrackerConfig, now: Instant) -> Self {
        let mut tracker = Self::new(run.id.clone(), config, now);
        tracker.stage = run.stage.clone();
        tracker.message = run.message.clone();
        if let Some(progress) = run.progress {
            tracker.display_progress = (progress * 100.0).clamp(0.0, 100.0);
            tracker.server_progress = Some(tracker.display_progress);
        }
        // Elapsed time continues from registration, not from when tracking began.
        let age = Duration::try_from_secs_f64(run.age_secs(crate::run::now_secs()))
            .unwrap_or_default();
        if let Some(started) = now.checked_sub(age) {
            tracker.started_at = started;
        }
        match run.status {
            RunStatus::Succeeded => tracker.finish(TrackerPhase::Succeeded, now),
            RunStatus::Failed(reason) => tracker.finish(
                TrackerPhase::Failed {
                    reason,
                    message: run.message.clone(),
                },
                now,
            ),
            RunStatus::Queued | RunStatus::Running => {}
        }
        tracker
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> &TrackerPhase {
        &self.phase
    }

    /// Terminal latch: once set, no poll response changes this tracker.
    pub fn is_completed(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn display_progress(&self) -> f64 {
        self.display_progress
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.final_elapsed
            .unwrap_or_else(|| now.saturating_duration_since(self.started_at))
    }

    /// Apply one status observation.
    pub fn apply_poll(&mut self, status: &ToolStatus, now: Instant) -> PollOutcome {
        if self.is_completed() || self.stopped {
            debug!(run_id = %self.run_id, "Ignoring poll for finished tracker");
            return PollOutcome::Ignored;
        }
        self.poll_attempts += 1;
        self.consecutive_errors = 0;
        if !status.stage.is_empty() {
            self.stage = status.stage.clone();
        }
        if !status.message.is_empty() {
            self.message = status.message.clone();
        }
        if let Some(server_elapsed) = status
            .elapsed_s
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            self.reconcile_elapsed(server_elapsed, now);
        }

        match status.phase {
            Phase::Done => {
                self.finish(TrackerPhase::Succeeded, now);
                return PollOutcome::Finished;
            }
            Phase::Error | Phase::Cancelled => {
                let reason = if status.phase == Phase::Cancelled {
                    FailureReason::Cancelled
                } else {
                    FailureReason::ServerError
                };
                self.finish(
                    TrackerPhase::Failed {
                        reason,
                        message: status.failure_detail(),
                    },
                    now,
                );
                return PollOutcome::Finished;
            }
            Phase::Queued | Phase::Running => {}
        }

        let outcome = match status.percent {
            Some(percent) => {
                // Real data always wins over the estimate, even when lower.
                self.server_progress = Some(percent);
                self.animating = false;
                self.set_display(percent, now);
                PollOutcome::Progress
            }
            None if status.phase == Phase::Running => {
                if !self.animating {
                    self.animating = true;
                    self.last_step_at = now;
                }
                PollOutcome::Estimating
            }
            None => PollOutcome::Estimating,
        };

        if self.poll_attempts >= self.config.max_poll_attempts {
            self.give_up_timeout(now);
            return PollOutcome::Finished;
        }
        outcome
    }

    /// Record a poll that failed to reach the server.
    pub fn record_poll_error(&mut self, error: &str, now: Instant) -> PollOutcome {
        if self.is_completed() || self.stopped {
            return PollOutcome::Ignored;
        }
        self.poll_attempts += 1;
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.config.max_consecutive_errors {
            self.finish(
                TrackerPhase::Failed {
                    reason: FailureReason::ConnectivityError,
                    message: format!(
                        "Connectivity issue: {} status checks in a row failed (last error: {}). \
                         The job may still be running on the server; check your connection and retry.",
                        self.consecutive_errors, error
                    ),
                },
                now,
            );
            return PollOutcome::Finished;
        }
        if self.poll_attempts >= self.config.max_poll_attempts {
            self.give_up_timeout(now);
            return PollOutcome::Finished;
        }
        PollOutcome::Error
    }

    /// Record a poll the server answered with an error that says nothing
    /// about connectivity (a bad request, an unreadable body). It uses up an
    /// attempt but does not feed the connectivity breaker.
    pub fn record_rejected_poll(&mut self, now: Instant) -> PollOutcome {
        if self.is_completed() || self.stopped {
            return PollOutcome::Ignored;
        }
        self.poll_attempts += 1;
        if self.poll_attempts >= self.config.max_poll_attempts {
            self.give_up_timeout(now);
            return PollOutcome::Finished;
        }
        PollOutcome::Error
    }

    /// Advance local animation and stuck detection. Returns whether anything
    /// visible changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.is_completed() || self.stopped {
            return false;
        }
        let before = (self.display_progress, self.indicator);

        if self.animating && !self.config.tick_interval.is_zero() {
            while now.saturating_duration_since(self.last_step_at) >= self.config.tick_interval {
                self.last_step_at += self.config.tick_interval;
                let next = self.display_progress + self.config.animation_step;
                if next < self.config.animation_cap {
                    let at = self.last_step_at;
                    self.set_display(next, at);
                }
            }
        }

        if now.saturating_duration_since(self.last_change_at) >= self.config.stuck_after {
            self.indicator = Indicator::Indeterminate;
        }

        before != (self.display_progress, self.indicator)
    }

    /// Force a terminal failure, e.g. after a user cancel. No-op once terminal.
    pub fn fail(&mut self, reason: FailureReason, message: &str, now: Instant) {
        if self.is_completed() {
            return;
        }
        self.finish(
            TrackerPhase::Failed {
                reason,
                message: message.to_string(),
            },
            now,
        );
    }

    /// Adopt a terminal status learned elsewhere (the store, via the poller).
    pub fn adopt_terminal(&mut self, run: &RunRecord, now: Instant) {
        if self.is_completed() {
            return;
        }
        match run.status {
            RunStatus::Succeeded => self.finish(TrackerPhase::Succeeded, now),
            RunStatus::Failed(reason) => self.finish(
                TrackerPhase::Failed {
                    reason,
                    message: run.message.clone(),
                },
                now,
            ),
            RunStatus::Queued | RunStatus::Running => {}
        }
    }

    /// Halt all local animation. Idempotent.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.animating = false;
    }

    pub fn view(&self, now: Instant) -> ProgressView {
        ProgressView {
            run_id: self.run_id.clone(),
            display_progress: self.display_progress,
            server_progress: self.server_progress,
            indicator: self.indicator,
            phase: self.phase.clone(),
            stage: self.stage.clone(),
            message: match &self.phase {
                TrackerPhase::Failed { message, .. } => message.clone(),
                _ => self.message.clone(),
            },
            elapsed: self.elapsed(now),
        }
    }

    fn set_display(&mut self, value: f64, now: Instant) {
        if (value - self.display_progress).abs() > PROGRESS_EPSILON {
            self.display_progress = value;
            self.last_change_at = now;
            self.indicator = Indicator::Determinate;
        }
    }

    fn reconcile_elapsed(&mut self, server_elapsed: Duration, now: Instant) {
        let local = now.saturating_duration_since(self.started_at);
        let drift = if local > server_elapsed {
            local - server_elapsed
        } else {
            server_elapsed - local
        };
        if drift > self.config.elapsed_drift_tolerance {
            if let Some(started) = now.checked_sub(server_elapsed) {
                debug!(run_id = %self.run_id, drift_ms = drift.as_millis() as u64, "Resyncing elapsed clock");
                self.started_at = started;
            }
        }
    }

    fn give_up_timeout(&mut self, now: Instant) {
        let waited = self.elapsed(now).as_secs();
        self.finish(
            TrackerPhase::Failed {
                reason: FailureReason::Timeout,
                message: format!(
                    "Timed out waiting for progress after {} status checks ({}s). \
                     The job may still be running on the server; check back later.",
                    self.poll_attempts, waited
                ),
            },
            now,
        );
    }

    fn finish(&mut self, phase: TrackerPhase, now: Instant) {
        self.final_elapsed = Some(now.saturating_duration_since(self.started_at));
        self.animating = false;
        self.indicator = Indicator::Determinate;
        if phase == TrackerPhase::Succeeded {
            self.display_progress = 100.0;
            self.server_progress = Some(100.0);
        }
        self.phase = phase;
    }
}

// ============================================================================
// RunTracker: thread driving a ProgressTracker against the server and store
// ============================================================================

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn stop(&self) {
        *self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        self.wake.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleep up to `timeout`; returns true if stopped meanwhile.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}

/// Owns the polling thread for one run.
pub struct RunTracker {
    run_id: String,
    store: RunStore,
    tracker: Arc<Mutex<ProgressTracker>>,
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl RunTracker {
    /// Start tracking `run_id`, which must already be in the store. Fails if
    /// another tracker already owns the run.
    pub fn spawn(store: RunStore, run_id: &str, config: TrackerConfig) -> Result<Self> {
        let run = store
            .get(run_id)
            .ok_or_else(|| RunwatchError::UnknownRun(run_id.to_string()))?;
        let claim = store.claim_tracker(run_id)?;
        let tracker = Arc::new(Mutex::new(ProgressTracker::from_record(
            &run,
            config,
            Instant::now(),
        )));
        let signal = Arc::new(StopSignal::new());

        let thread = {
            let store = store.clone();
            let tracker = Arc::clone(&tracker);
            let signal = Arc::clone(&signal);
            thread::Builder::new()
                .name(format!("runwatch-track-{}", run_id))
                .spawn(move || track_loop(claim, run, &store, &tracker, &signal, config))?
        };
        info!(run_id, "Tracking run");

        Ok(Self {
            run_id: run_id.to_string(),
            store,
            tracker,
            signal,
            thread: Some(thread),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn view(&self) -> ProgressView {
        lock_tracker(&self.tracker).view(Instant::now())
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Cancel the run: best-effort server cancel, local terminal state, stop.
    pub fn cancel(&mut self) -> Result<RunRecord> {
        lock_tracker(&self.tracker).fail(
            FailureReason::Cancelled,
            CANCELLED_MESSAGE,
            Instant::now(),
        );
        self.stop();
        self.store.cancel_run(&self.run_id)
    }

    /// Stop every timer for this run and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            debug!(run_id = %self.run_id, "Tracker stopped");
        }
        lock_tracker(&self.tracker).stop();
    }
}

impl Drop for RunTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_tracker(tracker: &Mutex<ProgressTracker>) -> MutexGuard<'_, ProgressTracker> {
    tracker
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn track_loop(
    _claim: TrackerClaim,
    run: RunRecord,
    store: &RunStore,
    tracker: &Mutex<ProgressTracker>,
    signal: &StopSignal,
    config: TrackerConfig,
) {
    let run_id = run.id.clone();
    let mut next_poll = Instant::now();
    let tick = if config.tick_interval.is_zero() {
        config.poll_interval
    } else {
        config.tick_interval.min(config.poll_interval)
    };

    loop {
        if signal.is_stopped() || lock_tracker(tracker).is_completed() {
            break;
        }

        // The store may have learned the outcome from the active-run poller.
        if let Some(current) = store.get(&run_id) {
            if current.status.is_terminal() {
                lock_tracker(tracker).adopt_terminal(&current, Instant::now());
                break;
            }
        }

        if Instant::now() >= next_poll {
            poll_once(&run, store, tracker);
            next_poll = Instant::now() + config.poll_interval;
        }

        lock_tracker(tracker).tick(Instant::now());
        if signal.wait(tick) {
            break;
        }
    }
    debug!(run_id = %run_id, "Tracker loop exited");
}

fn poll_once(run: &RunRecord, store: &RunStore, tracker: &Mutex<ProgressTracker>) {
    let response = store.server().fetch_tool_status(run);
    let now = Instant::now();

    // The run may have been cancelled or settled while the request was out.
    if let Some(current) = store.get(&run.id) {
        if current.status.is_terminal() {
            debug!(run_id = %run.id, status = %current.status, "Dropping poll for finished run");
            lock_tracker(tracker).adopt_terminal(&current, now);
            return;
        }
    }

    match response {
        Ok(body) => {
            let status = normalize_status(&run.tool, &body);
            let (outcome, phase) = {
                let mut t = lock_tracker(tracker);
                let outcome = t.apply_poll(&status, now);
                (outcome, t.phase().clone())
            };
            if outcome == PollOutcome::Ignored {
                return;
            }
            if let Err(err) = store.apply_status(&run.id, &status) {
                warn!(run_id = %run.id, error = %err, "Failed to persist run status");
            }
            write_local_failure(store, &run.id, &phase, &status);
        }
        Err(RunwatchError::NotFound(path)) => {
            info!(run_id = %run.id, %path, "Status endpoint has no record of run");
            reconcile_missing(run, store, tracker);
        }
        Err(err) => record_failed_poll(run, store, tracker, &err, now),
    }
}

fn record_failed_poll(
    run: &RunRecord,
    store: &RunStore,
    tracker: &Mutex<ProgressTracker>,
    err: &RunwatchError,
    now: Instant,
) {
    let transient = err.is_transient();
    warn!(run_id = %run.id, error = %err, transient, "Status poll failed");
    let (outcome, phase) = {
        let mut t = lock_tracker(tracker);
        let outcome = if transient {
            t.record_poll_error(&err.to_string(), now)
        } else {
            t.record_rejected_poll(now)
        };
        (outcome, t.phase().clone())
    };
    if outcome == PollOutcome::Finished {
        if let TrackerPhase::Failed { reason, message } = &phase {
            error!(run_id = %run.id, %message, "Giving up on run");
            if let Err(err) = store.fail_active_run(&run.id, *reason, message) {
                warn!(run_id = %run.id, error = %err, "Failed to persist run failure");
            }
        }
    }
}

/// The server lost the run. Take its `/runs/{id}` view if it has one,
/// otherwise the run is stale.
fn reconcile_missing(run: &RunRecord, store: &RunStore, tracker: &Mutex<ProgressTracker>) {
    if let Err(err) = store.refresh_run(&run.id) {
        if err.is_transient() {
            record_failed_poll(run, store, tracker, &err, Instant::now());
            return;
        }
    }
    let now = Instant::now();
    match store.get(&run.id) {
        Some(current) if current.status.is_terminal() => {
            lock_tracker(tracker).adopt_terminal(&current, now);
        }
        _ => {
            lock_tracker(tracker).fail(FailureReason::Stale, STALE_MESSAGE, now);
            if let Err(err) = store.fail_active_run(&run.id, FailureReason::Stale, STALE_MESSAGE) {
                warn!(run_id = %run.id, error = %err, "Failed to persist stale run");
            }
        }
    }
}

/// Client-side give-ups are not in the server's status; write them separately.
fn write_local_failure(store: &RunStore, run_id: &str, phase: &TrackerPhase, status: &ToolStatus) {
    if let TrackerPhase::Failed { reason, message } = phase {
        if status.status() != RunStatus::Failed(*reason) {
            warn!(run_id, %message, "Giving up on run");
            if let Err(err) = store.fail_active_run(run_id, *reason, message) {
                warn!(run_id, error = %err, "Failed to persist run failure");
            }
        }
    }
}
