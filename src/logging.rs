//! Logging setup for the CLI.
//!
//! Installs a global tracing subscriber on stderr so log lines never mix with
//! the run listings and progress bars on stdout.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Another global subscriber was installed first.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize tracing. `RUST_LOG` wins when set; otherwise runwatch logs at
/// `info`, or `debug` when `verbose`.
///
/// Subsequent calls are no-ops.
pub fn init(verbose: bool) -> Result<(), LoggingError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default().with(build_env_filter(verbose)).with(
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr),
    );
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = INITIALIZED.set(());

    tracing::debug!(verbose, "Logging initialized");
    Ok(())
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "runwatch=debug"
    } else {
        "runwatch=info"
    }
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_follows_verbosity() {
        assert_eq!(default_directive(false), "runwatch=info");
        assert_eq!(default_directive(true), "runwatch=debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init(false).is_ok());
        assert!(init(true).is_ok());
    }
}
