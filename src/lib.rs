pub mod commands;
pub mod config;
pub mod dismissal;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod output;
pub mod poller;
pub mod progress;
pub mod routes;
pub mod run;
pub mod server;
pub mod signal;
pub mod storage;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use dismissal::DismissalSet;
pub use error::{Result, RunwatchError};
pub use poller::{ActivePoller, PollerConfig};
pub use routes::resolve_route;
pub use run::{FailureReason, NewRun, RunRecord, RunStatus, Tool};
pub use server::{HttpRunServer, RunServer};
pub use storage::{FileSlot, MemorySlot, Slot};
pub use store::{RunStore, StoreEvent, StoreSnapshot};
pub use tracker::{ProgressTracker, ProgressView, RunTracker, TrackerConfig};
