use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunwatchError {
    #[error("Run not found on server: {0}")]
    NotFound(String),

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool '{0}' has no cancel endpoint")]
    CancelUnsupported(String),

    #[error("Storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    #[error("Run {id} failed: {message}")]
    RunFailed { id: String, message: String },

    #[error("A poller is already running for this store")]
    PollerAlreadyRunning,

    #[error("Run {0} is already being tracked")]
    AlreadyTracked(String),

    #[error("Failed to set signal handler: {0}")]
    SignalHandler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RunwatchError {
    /// True for failures that say nothing about the run itself, only about
    /// our ability to reach the server right now.
    pub fn is_transient(&self) -> bool {
        match self {
            RunwatchError::Transport(_) | RunwatchError::Io(_) => true,
            RunwatchError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        assert!(RunwatchError::Transport("connection refused".into()).is_transient());
    }

    #[test]
    fn test_server_side_http_errors_are_transient() {
        let err = RunwatchError::Http {
            status: 503,
            body: "busy".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_is_not_transient() {
        assert!(!RunwatchError::NotFound("abc".into()).is_transient());
        let err = RunwatchError::Http {
            status: 400,
            body: "bad".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RunwatchError::AlreadyTracked("r1".into()).to_string(),
            "Run r1 is already being tracked"
        );
        assert_eq!(
            RunwatchError::CancelUnsupported("trainer".into()).to_string(),
            "Tool 'trainer' has no cancel endpoint"
        );
    }
}
