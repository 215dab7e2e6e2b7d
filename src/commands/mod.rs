//! CLI command handlers for runwatch.
//!
//! - [`status`] - Active runs, history, single-run routes
//! - [`watch`] - Live running-jobs banner driven by the poller
//! - [`track`] - Live progress bar for one run
//! - [`register`] - Optimistic run registration
//! - [`dismiss`] - Session dismissals
//! - [`cancel`] - Cancelling runs and clearing history
//! - [`config`] - Showing the effective configuration

mod cancel;
mod config;
mod dismiss;
mod register;
mod status;
mod track;
mod watch;

pub use cancel::{cancel_command, clear_history_command};
pub use config::config_display_command;
pub use dismiss::{dismiss_command, session_end_command};
pub use register::{register_command, RegisterOptions};
pub use status::{history_command, route_command, status_command};
pub use track::track_command;
pub use watch::watch_command;

use crate::config::Config;
use crate::dismissal::DismissalSet;
use crate::error::Result;
use crate::server::{HttpRunServer, RunServer};
use crate::storage::{FileSlot, Slot};
use crate::store::RunStore;
use std::sync::Arc;

/// Environment variable naming the dismissal session.
pub const SESSION_ENV_VAR: &str = "RUNWATCH_SESSION";
pub const DEFAULT_SESSION: &str = "default";

/// Everything a command needs: settings, the shared store, and the session.
pub struct CommandContext {
    pub config: Config,
    pub store: RunStore,
    pub session: String,
}

impl CommandContext {
    /// Open the file-backed store and HTTP client described by `config`.
    pub fn open(config: Config, session: String) -> Result<Self> {
        let server = HttpRunServer::new(
            &config.server.base_url,
            config.connect_timeout(),
            config.read_timeout(),
        );
        let slot = FileSlot::new(config.runs_path()?);
        Ok(Self::with_parts(config, Arc::new(slot), Arc::new(server), session))
    }

    /// Assemble a context from explicit parts.
    pub fn with_parts(
        config: Config,
        slot: Arc<dyn Slot>,
        server: Arc<dyn RunServer>,
        session: String,
    ) -> Self {
        let store = RunStore::new(slot, server);
        store.set_stale_grace(config.stale_grace());
        Self {
            config,
            store,
            session,
        }
    }

    /// The dismissal set of this context's session.
    pub fn dismissals(&self) -> Result<DismissalSet> {
        let slot = FileSlot::new(self.config.session_path(&self.session)?);
        DismissalSet::load(Arc::new(slot))
    }
}

/// Session name from the flag, then the environment, then the default.
pub fn resolve_session(flag: Option<&str>, env_value: Option<String>) -> String {
    flag.map(str::to_string)
        .or(env_value)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION.to_string())
}
