//! Background poller that keeps the run store fresh.
//!
//! One poller per store: [`ActivePoller::start`] claims the store's poller
//! slot, so mounting several views never multiplies polling. The loop refreshes
//! the active-run list, then sleeps for a cadence chosen from the number of
//! active runs after that refresh. While hidden it parks without a timer and
//! refreshes immediately once visible again.

use crate::error::Result;
use crate::store::RunStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Cadence while at least one run is queued or running.
    pub active_interval: Duration,
    /// Cadence while nothing is active.
    pub idle_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(2),
            idle_interval: Duration::from_secs(10),
        }
    }
}

/// Interval to wait before the next refresh given `active_count` active runs.
pub fn poll_interval(active_count: usize, config: &PollerConfig) -> Duration {
    if active_count > 0 {
        config.active_interval
    } else {
        config.idle_interval
    }
}

#[derive(Debug)]
struct Control {
    stopped: bool,
    visible: bool,
    refresh_requested: bool,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    refreshes: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ActivePoller {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ActivePoller {
    /// Start polling `store`. Refreshes once immediately, then on the
    /// adaptive cadence. Fails if the store already has a poller.
    pub fn start(store: RunStore, config: PollerConfig) -> Result<Self> {
        let claim = store.claim_poller()?;
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                stopped: false,
                visible: true,
                refresh_requested: false,
            }),
            wake: Condvar::new(),
            refreshes: AtomicU64::new(0),
        });

        let shared_clone = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("runwatch-poller".to_string())
            .spawn(move || {
                let _claim = claim;
                poll_loop(&store, config, &shared_clone);
                debug!("Poller thread exiting");
            })?;

        info!(
            active_ms = config.active_interval.as_millis() as u64,
            idle_ms = config.idle_interval.as_millis() as u64,
            "Poller started"
        );
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Suspend (`false`) or resume (`true`) polling. Resuming refreshes
    /// immediately.
    pub fn set_visible(&self, visible: bool) {
        let mut control = self.shared.lock();
        if control.visible == visible {
            return;
        }
        control.visible = visible;
        if visible {
            control.refresh_requested = true;
        }
        debug!(visible, "Poller visibility changed");
        self.shared.wake.notify_all();
    }

    pub fn is_visible(&self) -> bool {
        self.shared.lock().visible
    }

    /// Refresh now instead of waiting out the current interval.
    pub fn request_refresh(&self) {
        self.shared.lock().refresh_requested = true;
        self.shared.wake.notify_all();
    }

    /// Number of refresh attempts made so far, failed ones included.
    pub fn ticks(&self) -> u64 {
        self.shared.refreshes.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop polling and wait for the thread to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.shared.lock().stopped = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            info!("Poller stopped");
        }
    }
}

impl Drop for ActivePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(store: &RunStore, config: PollerConfig, shared: &Shared) {
    loop {
        {
            let mut control = shared.lock();
            while !control.stopped && !control.visible {
                control = shared
                    .wake
                    .wait(control)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if control.stopped {
                return;
            }
            control.refresh_requested = false;
        }

        // Failures are logged by the store; the cadence carries on regardless.
        let _ = store.refresh_active_runs();
        shared.refreshes.fetch_add(1, Ordering::SeqCst);

        let interval = poll_interval(store.active_count(), &config);
        debug!(interval_ms = interval.as_millis() as u64, "Next poll scheduled");
        let deadline = Instant::now() + interval;

        let mut control = shared.lock();
        while !control.stopped && !control.refresh_requested && control.visible {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            control = shared
                .wake
                .wait_timeout(control, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunwatchError;
    use crate::run::{NewRun, RunStatus, Tool};
    use crate::storage::MemorySlot;
    use crate::test_utils::{server_record, wait_until, FakeServer};

    const WAIT: Duration = Duration::from_secs(2);

    fn store_with(server: Arc<FakeServer>) -> RunStore {
        RunStore::new(Arc::new(MemorySlot::new()), server)
    }

    fn config(active_ms: u64, idle_ms: u64) -> PollerConfig {
        PollerConfig {
            active_interval: Duration::from_millis(active_ms),
            idle_interval: Duration::from_millis(idle_ms),
        }
    }

    fn calls(server: &FakeServer) -> usize {
        server.active_calls.load(Ordering::SeqCst)
    }

    #[test]
    fn test_poll_interval_defaults() {
        let config = PollerConfig::default();
        assert_eq!(poll_interval(0, &config), Duration::from_secs(10));
        assert_eq!(poll_interval(1, &config), Duration::from_secs(2));
        assert_eq!(poll_interval(7, &config), Duration::from_secs(2));
    }

    #[test]
    fn test_interval_follows_store_active_count() {
        let store = store_with(Arc::new(FakeServer::new()));
        let config = PollerConfig::default();
        assert_eq!(
            poll_interval(store.active_count(), &config),
            Duration::from_secs(10)
        );

        store.register_run(NewRun::started("r1", Tool::Trainer)).unwrap();
        assert_eq!(
            poll_interval(store.active_count(), &config),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_start_refreshes_immediately() {
        let server = Arc::new(FakeServer::new());
        let store = store_with(server.clone());
        let mut poller = ActivePoller::start(store, config(60_000, 60_000)).unwrap();

        assert!(wait_until(WAIT, || calls(&server) >= 1));
        poller.stop();
    }

    #[test]
    fn test_speeds_up_when_runs_are_active() {
        let server = Arc::new(FakeServer::new());
        server.set_active(vec![server_record("r1", Tool::Trainer, RunStatus::Running)]);
        let store = store_with(server.clone());
        let mut poller = ActivePoller::start(store, config(10, 60_000)).unwrap();

        assert!(wait_until(WAIT, || calls(&server) >= 3));
        poller.stop();
    }

    #[test]
    fn test_stays_slow_when_nothing_is_active() {
        let server = Arc::new(FakeServer::new());
        let store = store_with(server.clone());
        let mut poller = ActivePoller::start(store, config(10, 60_000)).unwrap();

        assert!(wait_until(WAIT, || calls(&server) >= 1));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(calls(&server), 1);
        poller.stop();
    }

    #[test]
    fn test_request_refresh_cuts_wait_short() {
        let server = Arc::new(FakeServer::new());
        let store = store_with(server.clone());
        let poller = ActivePoller::start(store, config(60_000, 60_000)).unwrap();
        assert!(wait_until(WAIT, || calls(&server) >= 1));

        poller.request_refresh();
        assert!(wait_until(WAIT, || calls(&server) >= 2));
    }

    #[test]
    fn test_hidden_poller_suspends_and_resumes_immediately() {
        let server = Arc::new(FakeServer::new());
        let store = store_with(server.clone());
        let mut poller = ActivePoller::start(store, config(10, 10)).unwrap();
        assert!(wait_until(WAIT, || calls(&server) >= 1));

        poller.set_visible(false);
        assert!(!poller.is_visible());
        // allow an in-flight refresh to finish
        thread::sleep(Duration::from_millis(50));
        let parked = calls(&server);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(calls(&server), parked);

        poller.set_visible(true);
        assert!(wait_until(WAIT, || calls(&server) > parked));
        poller.stop();
    }

    #[test]
    fn test_failures_do_not_stop_polling() {
        let server = Arc::new(FakeServer::new());
        server.set_offline(true);
        let store = store_with(server.clone());
        let poller = ActivePoller::start(store, config(10, 10)).unwrap();

        assert!(wait_until(WAIT, || calls(&server) >= 3));
        assert!(poller.is_running());
        assert!(poller.ticks() >= 3);
    }

    #[test]
    fn test_only_one_poller_per_store() {
        let store = store_with(Arc::new(FakeServer::new()));
        let _poller = ActivePoller::start(store.clone(), config(60_000, 60_000)).unwrap();
        assert!(matches!(
            ActivePoller::start(store, config(60_000, 60_000)),
            Err(RunwatchError::PollerAlreadyRunning)
        ));
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_store() {
        let server = Arc::new(FakeServer::new());
        let store = store_with(server.clone());
        let mut poller = ActivePoller::start(store.clone(), config(10, 10)).unwrap();
        poller.stop();
        poller.stop();
        assert!(!poller.is_running());

        let after_stop = calls(&server);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(calls(&server), after_stop);

        assert!(ActivePoller::start(store, config(10, 10)).is_ok());
    }
}
