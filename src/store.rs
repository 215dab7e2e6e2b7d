//! The persistent run store: single source of truth for every known run.
//!
//! Every mutation is a read-merge-write against the durable slot: the stored
//! snapshot is re-read, merged record-by-record with the in-memory copy
//! (newest `updated_at` wins), mutated, and written back before the call
//! returns. Two processes sharing a slot therefore converge instead of
//! clobbering each other's records.

use crate::error::{Result, RunwatchError};
use crate::normalize::ToolStatus;
use crate::routes;
use crate::run::{now_secs, FailureReason, NewRun, RunRecord, RunStatus};
use crate::server::RunServer;
use crate::storage::Slot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_STALE_GRACE: Duration = Duration::from_secs(30);
const STAMP_EPSILON: f64 = 1e-6;

pub const STALE_MESSAGE: &str =
    "The server no longer has a record of this run. It may have been lost in a server restart.";
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Everything the store knows, in its durable layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub runs_by_id: BTreeMap<String, RunRecord>,
    /// Derived from `runs_by_id`; recomputed on every mutation.
    #[serde(default)]
    pub active_run_ids: Vec<String>,
    /// Watermark of the last history clear. Records not updated since are gone.
    #[serde(default)]
    pub cleared_at: f64,
}

impl StoreSnapshot {
    pub fn get(&self, id: &str) -> Option<&RunRecord> {
        self.runs_by_id.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.runs_by_id.is_empty()
    }

    /// Active runs, oldest first.
    pub fn active_runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .active_run_ids
            .iter()
            .filter_map(|id| self.runs_by_id.get(id).cloned())
            .collect();
        runs.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        runs
    }

    /// All runs, most recently updated first.
    pub fn runs_newest_first(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.runs_by_id.values().cloned().collect();
        runs.sort_by(|a, b| b.updated_at.total_cmp(&a.updated_at));
        runs
    }

    fn recompute_active(&mut self) {
        self.active_run_ids = self
            .runs_by_id
            .values()
            .filter(|r| r.is_active())
            .map(|r| r.id.clone())
            .collect();
    }

    /// Merge a durable snapshot with an in-memory one. Per id the record with
    /// the higher `updated_at` wins; ties go to `local`.
    fn merge(durable: Option<StoreSnapshot>, local: &StoreSnapshot) -> StoreSnapshot {
        let Some(durable) = durable else {
            return local.clone();
        };
        let cleared_at = durable.cleared_at.max(local.cleared_at);
        let mut runs_by_id = durable.runs_by_id;
        for (id, record) in &local.runs_by_id {
            let keep_local = runs_by_id
                .get(id)
                .is_none_or(|existing| record.updated_at >= existing.updated_at);
            if keep_local {
                runs_by_id.insert(id.clone(), record.clone());
            }
        }
        runs_by_id.retain(|_, r| r.updated_at > cleared_at);
        let mut merged = StoreSnapshot {
            runs_by_id,
            active_run_ids: Vec::new(),
            cleared_at,
        };
        merged.recompute_active();
        merged
    }

    /// Insert or replace a record, stamping timestamps.
    fn upsert(&mut self, new_run: NewRun, created_hint: Option<f64>, now: f64) -> &RunRecord {
        let stamp = now.max(self.cleared_at + STAMP_EPSILON);
        let created_at = self
            .runs_by_id
            .get(&new_run.id)
            .map(|existing| existing.created_at)
            .or(created_hint.filter(|c| *c > 0.0))
            .unwrap_or(stamp);
        let id = new_run.id.clone();
        self.runs_by_id
            .insert(id.clone(), new_run.into_record(created_at, stamp));
        self.recompute_active();
        &self.runs_by_id[&id]
    }
}

/// Notification sent to subscribers after each committed mutation.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Changed(StoreSnapshot),
    Cleared,
}

struct StoreInner {
    slot: Arc<dyn Slot>,
    server: Arc<dyn RunServer>,
    state: Mutex<StoreSnapshot>,
    subscribers: Mutex<Vec<Sender<StoreEvent>>>,
    polling: AtomicBool,
    poller_claimed: AtomicBool,
    tracked: Mutex<HashSet<String>>,
    stale_grace_ms: AtomicU64,
}

/// Shared handle to the run store. Clones refer to the same store.
#[derive(Clone)]
pub struct RunStore {
    inner: Arc<StoreInner>,
}

impl RunStore {
    /// Open a store over `slot`, loading whatever it already holds.
    pub fn new(slot: Arc<dyn Slot>, server: Arc<dyn RunServer>) -> Self {
        let initial = load_durable(slot.as_ref()).unwrap_or_default();
        debug!(runs = initial.runs_by_id.len(), "Loaded run store");
        Self {
            inner: Arc::new(StoreInner {
                slot,
                server,
                state: Mutex::new(initial),
                subscribers: Mutex::new(Vec::new()),
                polling: AtomicBool::new(false),
                poller_claimed: AtomicBool::new(false),
                tracked: Mutex::new(HashSet::new()),
                stale_grace_ms: AtomicU64::new(DEFAULT_STALE_GRACE.as_millis() as u64),
            }),
        }
    }

    /// How old a locally-active run must be before its absence from the
    /// server's active list is double-checked.
    pub fn set_stale_grace(&self, grace: Duration) {
        self.inner
            .stale_grace_ms
            .store(grace.as_millis() as u64, Ordering::Relaxed);
    }

    fn stale_grace_secs(&self) -> f64 {
        self.inner.stale_grace_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn server(&self) -> &Arc<dyn RunServer> {
        &self.inner.server
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreSnapshot> {
        // A panic while holding the lock leaves a whole snapshot behind, never
        // a torn one, so the poisoned value is still usable.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `mutate` as one read-merge-write transaction.
    fn transact<R>(&self, mutate: impl FnOnce(&mut StoreSnapshot) -> R) -> Result<R> {
        let mut state = self.lock_state();
        let mut next = StoreSnapshot::merge(load_durable(self.inner.slot.as_ref()), &state);
        let out = mutate(&mut next);
        next.recompute_active();
        *state = next.clone();
        let saved = save_durable(self.inner.slot.as_ref(), &next);
        drop(state);
        self.notify(StoreEvent::Changed(next));
        saved.map(|_| out)
    }

    fn notify(&self, event: StoreEvent) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Receive a [`StoreEvent`] after every committed mutation.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> StoreSnapshot {
        self.lock_state().clone()
    }

    pub fn get(&self, id: &str) -> Option<RunRecord> {
        self.lock_state().get(id).cloned()
    }

    pub fn active_runs(&self) -> Vec<RunRecord> {
        self.lock_state().active_runs()
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active_run_ids.len()
    }

    pub fn runs_newest_first(&self) -> Vec<RunRecord> {
        self.lock_state().runs_newest_first()
    }

    /// True while `refresh_active_runs` is in flight. UI feedback only.
    pub fn is_polling(&self) -> bool {
        self.inner.polling.load(Ordering::Relaxed)
    }

    pub fn get_run_route(&self, run: &RunRecord) -> String {
        routes::route_for(run)
    }

    /// Pull in changes other writers made to the durable slot.
    pub fn sync_from_storage(&self) -> Result<()> {
        let mut state = self.lock_state();
        let merged = StoreSnapshot::merge(load_durable(self.inner.slot.as_ref()), &state);
        if merged == *state {
            return Ok(());
        }
        *state = merged.clone();
        drop(state);
        self.notify(StoreEvent::Changed(merged));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert or replace a run by id, stamping `created_at` (new runs only)
    /// and `updated_at` (always).
    pub fn register_run(&self, new_run: NewRun) -> Result<RunRecord> {
        debug!(id = %new_run.id, status = %new_run.status, "Registering run");
        self.transact(|s| s.upsert(new_run, None, now_secs()).clone())
    }

    /// Apply `edit` to an existing run and write it back through the same
    /// replace-and-stamp path. Returns `None` when the run is unknown.
    pub fn update_run(
        &self,
        id: &str,
        edit: impl FnOnce(&mut NewRun),
    ) -> Result<Option<RunRecord>> {
        self.transact(|s| {
            let mut new_run = s.get(id)?.to_new_run();
            edit(&mut new_run);
            Some(s.upsert(new_run, None, now_secs()).clone())
        })
    }

    /// Like [`update_run`](Self::update_run), but a run that already reached a
    /// terminal state is returned unchanged.
    fn update_active_run(
        &self,
        id: &str,
        edit: impl FnOnce(&mut NewRun),
    ) -> Result<Option<RunRecord>> {
        self.transact(|s| {
            let current = s.get(id)?.clone();
            if current.status.is_terminal() {
                debug!(id, status = %current.status, "Ignoring update for finished run");
                return Some(current);
            }
            let mut new_run = current.to_new_run();
            edit(&mut new_run);
            Some(s.upsert(new_run, None, now_secs()).clone())
        })
    }

    /// Write a status observation from a tool endpoint into the run. Runs that
    /// already finished (cancelled, or settled by another writer) keep their
    /// terminal state.
    pub fn apply_status(&self, id: &str, status: &ToolStatus) -> Result<Option<RunRecord>> {
        self.update_active_run(id, |run| {
            run.status = status.status();
            if let Some(percent) = status.percent {
                run.progress = Some(percent / 100.0);
            }
            if run.status == RunStatus::Succeeded {
                run.progress = Some(1.0);
            }
            if !status.stage.is_empty() {
                run.stage = status.stage.clone();
            }
            run.message = match run.status {
                RunStatus::Failed(_) => status.failure_detail(),
                _ => status.message.clone(),
            };
        })
    }

    /// Mark a run failed locally with a client-side reason.
    pub fn mark_failed(
        &self,
        id: &str,
        reason: FailureReason,
        message: &str,
    ) -> Result<Option<RunRecord>> {
        self.update_run(id, |run| {
            run.status = RunStatus::Failed(reason);
            run.message = message.to_string();
        })
    }

    /// Mark a run failed with a client-side reason unless it already finished.
    pub fn fail_active_run(
        &self,
        id: &str,
        reason: FailureReason,
        message: &str,
    ) -> Result<Option<RunRecord>> {
        self.update_active_run(id, |run| {
            run.status = RunStatus::Failed(reason);
            run.message = message.to_string();
        })
    }

    /// Replace the local record with the server's view of it.
    fn apply_server_record(snapshot: &mut StoreSnapshot, record: RunRecord, now: f64) {
        if let Some(local) = snapshot.get(&record.id) {
            // A cancel the server could not act on stays cancelled locally.
            if local.status == RunStatus::Failed(FailureReason::Cancelled) && record.is_active() {
                debug!(id = %record.id, "Ignoring server activity for locally cancelled run");
                return;
            }
        }
        let created_hint = Some(record.created_at);
        snapshot.upsert(record.to_new_run(), created_hint, now);
    }

    /// Fetch one run from the server and apply it. A failed fetch leaves the
    /// local record untouched.
    pub fn refresh_run(&self, id: &str) -> Result<()> {
        match self.inner.server.fetch_run(id) {
            Ok(Some(record)) => self.transact(|s| Self::apply_server_record(s, record, now_secs())),
            Ok(None) => self.mark_stale(id),
            Err(err) => {
                warn!(id, error = %err, "Failed to refresh run");
                Err(err)
            }
        }
    }

    fn mark_stale(&self, id: &str) -> Result<()> {
        self.transact(|s| {
            let Some(local) = s.get(id) else {
                return;
            };
            if !local.is_active() {
                return;
            }
            info!(id, "Run unknown to server; marking stale");
            let mut new_run = local.to_new_run();
            new_run.status = RunStatus::Failed(FailureReason::Stale);
            new_run.message = STALE_MESSAGE.to_string();
            s.upsert(new_run, None, now_secs());
        })
    }

    /// Merge the server's active-run list into the store. Local runs missing
    /// from the list are never deleted; active ones older than the stale
    /// grace period are re-checked individually.
    pub fn refresh_active_runs(&self) -> Result<()> {
        let _polling = PollingFlag::raise(&self.inner.polling);
        let runs = match self.inner.server.fetch_active_runs() {
            Ok(runs) => runs,
            Err(err) => {
                warn!(error = %err, "Failed to refresh active runs");
                return Err(err);
            }
        };
        debug!(count = runs.len(), "Fetched active runs");

        let listed: HashSet<String> = runs.iter().map(|r| r.id.clone()).collect();
        let grace = self.stale_grace_secs();
        let missing = self.transact(|s| {
            let now = now_secs();
            for record in runs {
                Self::apply_server_record(s, record, now);
            }
            s.active_runs()
                .into_iter()
                .filter(|r| !listed.contains(&r.id) && r.age_secs(now) >= grace)
                .map(|r| r.id)
                .collect::<Vec<_>>()
        })?;

        for id in missing {
            // Errors were already logged; the run stays as it was.
            let _ = self.refresh_run(&id);
        }
        Ok(())
    }

    /// Merge the server's recent-run list (`GET /runs?limit=N`) into the store.
    pub fn refresh_history(&self, limit: usize) -> Result<()> {
        let runs = self.inner.server.fetch_recent_runs(limit).inspect_err(|err| {
            warn!(error = %err, "Failed to fetch run history");
        })?;
        self.transact(|s| {
            let now = now_secs();
            for record in runs {
                Self::apply_server_record(s, record, now);
            }
        })
    }

    /// Cancel a run. The server call is best effort; the run is recorded as
    /// cancelled locally either way.
    pub fn cancel_run(&self, id: &str) -> Result<RunRecord> {
        let run = self
            .get(id)
            .ok_or_else(|| RunwatchError::UnknownRun(id.to_string()))?;
        if let Err(err) = self.inner.server.cancel(&run) {
            warn!(id, error = %err, "Server-side cancel failed; cancelling locally");
        }
        self.mark_failed(id, FailureReason::Cancelled, CANCELLED_MESSAGE)?
            .ok_or_else(|| RunwatchError::UnknownRun(id.to_string()))
    }

    /// Forget every run.
    pub fn clear_run_history(&self) -> Result<()> {
        let mut state = self.lock_state();
        let cleared = StoreSnapshot {
            cleared_at: now_secs().max(state.cleared_at),
            ..StoreSnapshot::default()
        };
        *state = cleared.clone();
        let saved = save_durable(self.inner.slot.as_ref(), &cleared);
        drop(state);
        info!("Cleared run history");
        self.notify(StoreEvent::Cleared);
        saved
    }

    // ------------------------------------------------------------------
    // Ownership claims
    // ------------------------------------------------------------------

    /// Claim the store's single poller slot.
    pub fn claim_poller(&self) -> Result<PollerClaim> {
        self.inner
            .poller_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RunwatchError::PollerAlreadyRunning)?;
        Ok(PollerClaim {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Claim the right to drive progress tracking for `id`.
    pub fn claim_tracker(&self, id: &str) -> Result<TrackerClaim> {
        let mut tracked = self
            .inner
            .tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tracked.insert(id.to_string()) {
            return Err(RunwatchError::AlreadyTracked(id.to_string()));
        }
        Ok(TrackerClaim {
            inner: Arc::clone(&self.inner),
            id: id.to_string(),
        })
    }
}

/// Held by the running poller; releases the slot on drop.
pub struct PollerClaim {
    inner: Arc<StoreInner>,
}

impl Drop for PollerClaim {
    fn drop(&mut self) {
        self.inner.poller_claimed.store(false, Ordering::SeqCst);
    }
}

/// Held by a run tracker; releases the run id on drop.
pub struct TrackerClaim {
    inner: Arc<StoreInner>,
    id: String,
}

impl TrackerClaim {
    pub fn run_id(&self) -> &str {
        &self.id
    }
}

impl Drop for TrackerClaim {
    fn drop(&mut self) {
        if let Ok(mut tracked) = self.inner.tracked.lock() {
            tracked.remove(&self.id);
        }
    }
}

struct PollingFlag<'a>(&'a AtomicBool);

impl<'a> PollingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Relaxed);
        Self(flag)
    }
}

impl Drop for PollingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

fn load_durable(slot: &dyn Slot) -> Option<StoreSnapshot> {
    let content = match slot.read() {
        Ok(Some(content)) => content,
        Ok(None) => return None,
        Err(err) => {
            warn!(error = %err, "Could not read run store; using in-memory copy");
            return None;
        }
    };
    match serde_json::from_str::<StoreSnapshot>(&content) {
        Ok(mut snapshot) => {
            snapshot.recompute_active();
            Some(snapshot)
        }
        Err(err) => {
            warn!(error = %err, "Run store snapshot is corrupt; using in-memory copy");
            None
        }
    }
}

fn save_durable(slot: &dyn Slot, snapshot: &StoreSnapshot) -> Result<()> {
    let content = serde_json::to_string_pretty(snapshot)?;
    slot.write(&content)
}
