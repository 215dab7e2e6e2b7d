use crate::error::{Result, RunwatchError};
use crate::poller::PollerConfig;
use crate::tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The base config directory name under ~/.config/
const CONFIG_DIR_NAME: &str = "runwatch";

/// Environment variable overriding `server.base_url`.
pub const SERVER_ENV_VAR: &str = "RUNWATCH_SERVER";

const STATE_SUBDIR: &str = "state";
const SESSIONS_SUBDIR: &str = "sessions";
const RUNS_FILENAME: &str = "runs.json";

// ============================================================================
// Configuration
// ============================================================================

/// Settings for runwatch, loaded from `~/.config/runwatch/config.toml`.
///
/// Every section and field is optional in the file; anything missing falls
/// back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub poller: PollerSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Base URL of the job server, without a trailing slash.
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001".to_string(),
            connect_timeout_secs: 5,
            read_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSection {
    pub active_interval_ms: u64,
    pub idle_interval_ms: u64,
    /// Locally-active runs younger than this are not re-checked when the
    /// server's active list omits them.
    pub stale_grace_secs: u64,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            active_interval_ms: 2_000,
            idle_interval_ms: 10_000,
            stale_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub poll_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub animation_step: f64,
    pub animation_cap: f64,
    pub stuck_after_ms: u64,
    pub max_poll_attempts: u32,
    pub max_consecutive_errors: u32,
    pub elapsed_drift_tolerance_secs: u64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            tick_interval_ms: 1_000,
            animation_step: 2.0,
            animation_cap: 90.0,
            stuck_after_ms: 3_000,
            max_poll_attempts: 60,
            max_consecutive_errors: 5,
            elapsed_drift_tolerance_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSection {
    /// Where run and session state lives. Empty means `~/.config/runwatch/state`.
    pub state_dir: String,
}

impl Config {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            active_interval: Duration::from_millis(self.poller.active_interval_ms),
            idle_interval: Duration::from_millis(self.poller.idle_interval_ms),
        }
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.poller.stale_grace_secs)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        let t = &self.tracker;
        TrackerConfig {
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            tick_interval: Duration::from_millis(t.tick_interval_ms),
            animation_step: t.animation_step,
            animation_cap: t.animation_cap,
            stuck_after: Duration::from_millis(t.stuck_after_ms),
            max_poll_attempts: t.max_poll_attempts,
            max_consecutive_errors: t.max_consecutive_errors,
            elapsed_drift_tolerance: Duration::from_secs(t.elapsed_drift_tolerance_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.server.read_timeout_secs)
    }

    /// Resolved state directory.
    pub fn state_dir(&self) -> Result<PathBuf> {
        if self.storage.state_dir.trim().is_empty() {
            Ok(config_dir()?.join(STATE_SUBDIR))
        } else {
            Ok(PathBuf::from(self.storage.state_dir.trim()))
        }
    }

    /// File backing the shared run store.
    pub fn runs_path(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join(RUNS_FILENAME))
    }

    /// File backing the dismissal set of `session`.
    pub fn session_path(&self, session: &str) -> Result<PathBuf> {
        Ok(self
            .state_dir()?
            .join(SESSIONS_SUBDIR)
            .join(format!("{}.json", sanitize_session(session))))
    }

    /// Apply environment overrides. `server_override` is the value of
    /// [`SERVER_ENV_VAR`], if set.
    pub fn with_server_override(mut self, server_override: Option<String>) -> Self {
        if let Some(url) = server_override.filter(|u| !u.trim().is_empty()) {
            self.server.base_url = url.trim().to_string();
        }
        self
    }
}

/// Session names become file names; anything outside `[A-Za-z0-9_-]` is replaced.
fn sanitize_session(session: &str) -> String {
    let cleaned: String = session
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Config Validation
// ============================================================================

use std::error::Error;
use std::fmt;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    ZeroInterval(&'static str),
    ActiveSlowerThanIdle { active_ms: u64, idle_ms: u64 },
    AnimationCapOutOfRange(f64),
    NonPositiveAnimationStep(f64),
    ZeroLimit(&'static str),
    EmptyBaseUrl,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroInterval(field) => write!(f, "`{}` must be greater than 0", field),
            ConfigError::ActiveSlowerThanIdle { active_ms, idle_ms } => write!(
                f,
                "`poller.active_interval_ms` ({}) must not exceed `poller.idle_interval_ms` ({})",
                active_ms, idle_ms
            ),
            ConfigError::AnimationCapOutOfRange(cap) => write!(
                f,
                "`tracker.animation_cap` must be in (0, 100], got {}",
                cap
            ),
            ConfigError::NonPositiveAnimationStep(step) => write!(
                f,
                "`tracker.animation_step` must be positive, got {}",
                step
            ),
            ConfigError::ZeroLimit(field) => write!(f, "`{}` must be at least 1", field),
            ConfigError::EmptyBaseUrl => write!(f, "`server.base_url` must not be empty"),
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for RunwatchError {
    fn from(err: ConfigError) -> Self {
        RunwatchError::Config(err.to_string())
    }
}

/// Validate a configuration for logical consistency.
pub fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    if config.server.base_url.trim().is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }

    let p = &config.poller;
    if p.active_interval_ms == 0 {
        return Err(ConfigError::ZeroInterval("poller.active_interval_ms"));
    }
    if p.idle_interval_ms == 0 {
        return Err(ConfigError::ZeroInterval("poller.idle_interval_ms"));
    }
    if p.active_interval_ms > p.idle_interval_ms {
        return Err(ConfigError::ActiveSlowerThanIdle {
            active_ms: p.active_interval_ms,
            idle_ms: p.idle_interval_ms,
        });
    }

    let t = &config.tracker;
    if t.poll_interval_ms == 0 {
        return Err(ConfigError::ZeroInterval("tracker.poll_interval_ms"));
    }
    if t.tick_interval_ms == 0 {
        return Err(ConfigError::ZeroInterval("tracker.tick_interval_ms"));
    }
    if t.animation_cap.is_nan() || t.animation_cap <= 0.0 || t.animation_cap > 100.0 {
        return Err(ConfigError::AnimationCapOutOfRange(t.animation_cap));
    }
    if t.animation_step.is_nan() || t.animation_step <= 0.0 {
        return Err(ConfigError::NonPositiveAnimationStep(t.animation_step));
    }
    if t.max_poll_attempts == 0 {
        return Err(ConfigError::ZeroLimit("tracker.max_poll_attempts"));
    }
    if t.max_consecutive_errors == 0 {
        return Err(ConfigError::ZeroLimit("tracker.max_consecutive_errors"));
    }

    Ok(())
}

// ============================================================================
// Config File Management
// ============================================================================

/// The filename for the configuration file.
const CONFIG_FILENAME: &str = "config.toml";

/// Written on first load so every option is discoverable without docs.
const DEFAULT_CONFIG_WITH_COMMENTS: &str = r#"# Runwatch Configuration

[server]
# Job server that reports run status
base_url = "http://127.0.0.1:8001"
connect_timeout_secs = 5
read_timeout_secs = 10

[poller]
# Active-run list refresh cadence while something is queued or running
active_interval_ms = 2000
# Cadence while nothing is active
idle_interval_ms = 10000
# Runs the server has not listed yet are left alone for this long after registration
stale_grace_secs = 30

[tracker]
# Status poll cadence for a tracked run
poll_interval_ms = 2000
# Animation and elapsed-clock cadence
tick_interval_ms = 1000
# Estimated progress added per tick while the server reports no number
animation_step = 2.0
# Estimated progress never reaches this percentage
animation_cap = 90.0
# Switch to an indeterminate indicator after this long without change
stuck_after_ms = 3000
# Give up (timeout) after this many status checks
max_poll_attempts = 60
# Give up (connectivity) after this many failed checks in a row
max_consecutive_errors = 5
# Resync the elapsed clock when the server differs by more than this
elapsed_drift_tolerance_secs = 5

[storage]
# Run and session state. Empty means ~/.config/runwatch/state
state_dir = ""
"#;

/// Get the runwatch config directory path (~/.config/runwatch/).
///
/// Does not create the directory.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RunwatchError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (~/.config/runwatch/config.toml).
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILENAME))
}

/// Load the configuration, creating a commented default file on first use,
/// then apply the `RUNWATCH_SERVER` override and validate.
pub fn load_config() -> Result<Config> {
    let config = load_config_from(&config_path()?)?
        .with_server_override(env::var(SERVER_ENV_VAR).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Load the configuration file at `path`, writing the commented defaults
/// there if it does not exist yet.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_WITH_COMMENTS)?;
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        RunwatchError::Config(format!("Failed to parse config file at {:?}: {}", path, e))
    })
}

/// Save `config` to `path`. Overwrites any comments in the existing file.
pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string(config)
        .map_err(|e| RunwatchError::Config(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, format!("# Runwatch Configuration\n\n{}", content))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_dir_returns_path_ending_with_runwatch() {
        let result = config_dir().unwrap();
        assert!(result.ends_with("runwatch"));
        assert!(result.parent().unwrap().ends_with(".config"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_commented_defaults_parse_to_default_config() {
        let parsed: Config = toml::from_str(DEFAULT_CONFIG_WITH_COMMENTS).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_load_creates_file_with_comments() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = load_config_from(&path).unwrap();

        assert_eq!(config, Config::default());
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("# Runwatch Configuration"));
        assert!(written.contains("idle_interval_ms = 10000"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[poller]\nidle_interval_ms = 30000\n").unwrap();

        let config = load_config_from(&path).unwrap();

        assert_eq!(config.poller.idle_interval_ms, 30_000);
        assert_eq!(config.poller.active_interval_ms, 2_000);
        assert_eq!(config.tracker, TrackerSection::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[poller\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, RunwatchError::Config(_)));
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let mut config = Config::default();
        config.server.base_url = "http://jobs.internal:9000".to_string();
        config.tracker.max_poll_attempts = 120;

        save_config_to(&config, &path).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn test_server_override() {
        let config = Config::default().with_server_override(Some(" http://other:1 ".to_string()));
        assert_eq!(config.server.base_url, "http://other:1");

        let unchanged = Config::default().with_server_override(Some("  ".to_string()));
        assert_eq!(unchanged.server.base_url, ServerSection::default().base_url);
    }

    #[test]
    fn test_validate_rejects_active_slower_than_idle() {
        let mut config = Config::default();
        config.poller.active_interval_ms = 20_000;
        assert_eq!(
            validate_config(&config),
            Err(ConfigError::ActiveSlowerThanIdle {
                active_ms: 20_000,
                idle_ms: 10_000
            })
        );
    }

    #[test]
    fn test_validate_rejects_bad_tracker_values() {
        let mut config = Config::default();
        config.tracker.animation_cap = 120.0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::AnimationCapOutOfRange(_))
        ));

        let mut config = Config::default();
        config.tracker.animation_step = 0.0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::NonPositiveAnimationStep(_))
        ));

        let mut config = Config::default();
        config.tracker.max_consecutive_errors = 0;
        assert_eq!(
            validate_config(&config),
            Err(ConfigError::ZeroLimit("tracker.max_consecutive_errors"))
        );

        let mut config = Config::default();
        config.tracker.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_converts_to_config_error() {
        let err: RunwatchError = ConfigError::EmptyBaseUrl.into();
        assert!(matches!(err, RunwatchError::Config(ref m) if m.contains("base_url")));
    }

    #[test]
    fn test_runtime_configs_match_defaults() {
        let config = Config::default();
        assert_eq!(config.poller_config(), PollerConfig::default());
        assert_eq!(config.tracker_config(), TrackerConfig::default());
        assert_eq!(config.stale_grace(), Duration::from_secs(30));
    }

    #[test]
    fn test_state_paths() {
        let mut config = Config::default();
        config.storage.state_dir = "/tmp/rw-state".to_string();
        assert_eq!(
            config.runs_path().unwrap(),
            PathBuf::from("/tmp/rw-state/runs.json")
        );
        assert_eq!(
            config.session_path("tab 1/../x").unwrap(),
            PathBuf::from("/tmp/rw-state/sessions/tab_1____x.json")
        );
        assert!(Config::default().state_dir().unwrap().ends_with("runwatch/state"));
    }
}
