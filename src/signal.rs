//! Ctrl+C handling for the long-running commands (`watch`, `track`).
//!
//! The handler only raises a flag; the command loops check it between
//! renders and then stop their poller or tracker the normal way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, RunwatchError};

const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register the SIGINT handler. Can only succeed once per process.
    pub fn new() -> Result<Self> {
        let handler = Self::detached();
        let flag = Arc::clone(&handler.shutdown_flag);

        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .map_err(|e| RunwatchError::SignalHandler(e.to_string()))?;

        Ok(handler)
    }

    /// A handler not wired to any signal; [`SignalHandler::request_shutdown`]
    /// is the only way to trip it.
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
    }

    /// Sleep for `timeout` or until shutdown is requested, whichever comes
    /// first. Returns whether shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_shutdown_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handler_starts_clear() {
        assert!(!SignalHandler::detached().is_shutdown_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let handler = SignalHandler::detached();
        let other = handler.clone();
        other.request_shutdown();
        assert!(handler.is_shutdown_requested());
    }

    #[test]
    fn test_wait_times_out_without_request() {
        let handler = SignalHandler::detached();
        let start = Instant::now();
        assert!(!handler.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_returns_early_on_request() {
        let handler = SignalHandler::detached();
        let remote = handler.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.request_shutdown();
        });

        let start = Instant::now();
        assert!(handler.wait(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        waker.join().unwrap();
    }
}
