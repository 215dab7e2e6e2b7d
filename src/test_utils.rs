//! Test utilities shared across modules.
//!
//! [`FakeServer`] stands in for the job server: tests script what each
//! endpoint returns and read back how often it was called.

use crate::error::{Result, RunwatchError};
use crate::run::{NewRun, RunRecord, RunStatus, Tool};
use crate::server::RunServer;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Server record with the given status, for scripting responses.
pub fn server_record(id: &str, tool: Tool, status: RunStatus) -> RunRecord {
    NewRun::started(id, tool)
        .with_status(status)
        .into_record(1_000.0, 1_000.0)
}

#[derive(Clone)]
enum ScriptedStatus {
    Body(Value),
    Failure,
    NotFound,
}

#[derive(Default)]
pub struct FakeServer {
    active: Mutex<Vec<RunRecord>>,
    runs: Mutex<HashMap<String, RunRecord>>,
    recent: Mutex<Vec<RunRecord>>,
    statuses: Mutex<HashMap<String, VecDeque<ScriptedStatus>>>,
    status_delay: Mutex<Duration>,
    offline: Mutex<bool>,
    cancel_fails: Mutex<bool>,
    pub active_calls: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, runs: Vec<RunRecord>) {
        *self.active.lock().unwrap() = runs;
    }

    pub fn set_run(&self, run: RunRecord) {
        self.runs.lock().unwrap().insert(run.id.clone(), run);
    }

    pub fn set_recent(&self, runs: Vec<RunRecord>) {
        *self.recent.lock().unwrap() = runs;
    }

    /// Queue a status body for `id`. The last queued body repeats once the
    /// queue is drained.
    pub fn push_status(&self, id: &str, body: Value) {
        self.script(id, ScriptedStatus::Body(body));
    }

    /// Queue a failed status poll for `id`.
    pub fn push_status_error(&self, id: &str) {
        self.script(id, ScriptedStatus::Failure);
    }

    /// Queue a 404 from the status endpoint of `id`.
    pub fn push_status_not_found(&self, id: &str) {
        self.script(id, ScriptedStatus::NotFound);
    }

    fn script(&self, id: &str, entry: ScriptedStatus) {
        self.statuses
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(entry);
    }

    /// Make every status poll take `delay` before answering.
    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn set_cancel_fails(&self, fails: bool) {
        *self.cancel_fails.lock().unwrap() = fails;
    }

    fn check_online(&self) -> Result<()> {
        if *self.offline.lock().unwrap() {
            return Err(RunwatchError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

impl RunServer for FakeServer {
    fn fetch_active_runs(&self) -> Result<Vec<RunRecord>> {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.active.lock().unwrap().clone())
    }

    fn fetch_run(&self, id: &str) -> Result<Option<RunRecord>> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.runs.lock().unwrap().get(id).cloned())
    }

    fn fetch_recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.check_online()?;
        Ok(self.recent.lock().unwrap().iter().take(limit).cloned().collect())
    }

    fn fetch_tool_status(&self, run: &RunRecord) -> Result<Value> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.check_online()?;
        let next = {
            let mut statuses = self.statuses.lock().unwrap();
            let queue = statuses.entry(run.id.clone()).or_default();
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };
        match next {
            Some(ScriptedStatus::Body(body)) => Ok(body),
            Some(ScriptedStatus::NotFound) => Err(RunwatchError::NotFound(format!(
                "/status/{}",
                run.id
            ))),
            Some(ScriptedStatus::Failure) | None => {
                Err(RunwatchError::Transport("scripted poll failure".to_string()))
            }
        }
    }

    fn cancel(&self, run: &RunRecord) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if *self.cancel_fails.lock().unwrap() {
            return Err(RunwatchError::CancelUnsupported(run.tool.to_string()));
        }
        Ok(())
    }

    fn health(&self) -> Result<()> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_queue_repeats_last_entry() {
        let server = FakeServer::new();
        let run = server_record("r1", Tool::Trainer, RunStatus::Running);
        server.push_status("r1", json!({"phase": "a"}));
        server.push_status("r1", json!({"phase": "b"}));

        assert_eq!(server.fetch_tool_status(&run).unwrap()["phase"], "a");
        assert_eq!(server.fetch_tool_status(&run).unwrap()["phase"], "b");
        assert_eq!(server.fetch_tool_status(&run).unwrap()["phase"], "b");
        assert_eq!(server.status_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_offline_server_fails_every_call() {
        let server = FakeServer::new();
        server.set_offline(true);
        assert!(server.fetch_active_runs().is_err());
        assert!(server.fetch_run("x").is_err());
        assert!(server.health().is_err());
    }
}
