//! Run records: one tracked asynchronous job on the remote server.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix for ids generated locally before the server has assigned one.
pub const PLACEHOLDER_PREFIX: &str = "pending-";

/// The kind of job a run represents.
///
/// Unknown tool names are kept verbatim in [`Tool::Other`] so new tools can
/// flow through the store without code changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tool {
    LabelingOptimizer,
    TrainingChartGenerator,
    Trainer,
    Analysis,
    Backtester,
    Other(String),
}

impl Tool {
    pub fn as_str(&self) -> &str {
        match self {
            Tool::LabelingOptimizer => "labeling-optimizer",
            Tool::TrainingChartGenerator => "training-chart-generator",
            Tool::Trainer => "trainer",
            Tool::Analysis => "analysis",
            Tool::Backtester => "backtester",
            Tool::Other(name) => name,
        }
    }
}

impl From<String> for Tool {
    fn from(value: String) -> Self {
        match value.as_str() {
            "labeling-optimizer" => Tool::LabelingOptimizer,
            "training-chart-generator" => Tool::TrainingChartGenerator,
            "trainer" => Tool::Trainer,
            "analysis" => Tool::Analysis,
            "backtester" => Tool::Backtester,
            _ => Tool::Other(value),
        }
    }
}

impl From<&str> for Tool {
    fn from(value: &str) -> Self {
        Tool::from(value.to_string())
    }
}

impl From<Tool> for String {
    fn from(tool: Tool) -> Self {
        tool.as_str().to_string()
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The server reported the job failed.
    ServerError,
    /// The user cancelled the job.
    Cancelled,
    /// The client believed the run active but the server no longer knows it.
    Stale,
    /// The client gave up polling; the job may still be running server-side.
    Timeout,
    /// Too many consecutive polls failed to reach the server.
    ConnectivityError,
}

/// Lifecycle state of a run.
///
/// On the wire this is a single string; `Failed` carries its reason so terminal
/// detail never has to be string-matched downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed(FailureReason),
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed(FailureReason::ServerError) => "failed",
            RunStatus::Failed(FailureReason::Cancelled) => "cancelled",
            RunStatus::Failed(FailureReason::Stale) => "stale",
            RunStatus::Failed(FailureReason::Timeout) => "timeout",
            RunStatus::Failed(FailureReason::ConnectivityError) => "connectivity-error",
        }
    }

    /// Parse a status string, accepting the aliases different tool endpoints use.
    /// Returns `None` for strings that are not a recognised status.
    pub fn parse(value: &str) -> Option<Self> {
        let status = match value.trim().to_ascii_lowercase().as_str() {
            "queued" | "ready" | "pending" => RunStatus::Queued,
            "running" | "in-progress" | "in_progress" => RunStatus::Running,
            "succeeded" | "done" | "completed" | "success" => RunStatus::Succeeded,
            "failed" | "error" => RunStatus::Failed(FailureReason::ServerError),
            "cancelled" | "canceled" => RunStatus::Failed(FailureReason::Cancelled),
            "stale" => RunStatus::Failed(FailureReason::Stale),
            "timeout" => RunStatus::Failed(FailureReason::Timeout),
            "connectivity-error" => RunStatus::Failed(FailureReason::ConnectivityError),
            _ => return None,
        };
        Some(status)
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        // Anything unrecognised is treated as still in flight; the next poll
        // will correct it, whereas a false terminal state would stop polling.
        RunStatus::parse(&value).unwrap_or(RunStatus::Running)
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked job as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub tool: Tool,
    pub status: RunStatus,
    /// Authoritative fraction in `[0,1]` as last reported by the server.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: f64,
    #[serde(default)]
    pub updated_at: f64,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub parent_run_id: Option<String>,
}

impl RunRecord {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Seconds since the run was first registered.
    pub fn age_secs(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }

    /// Progress as a whole percentage for display, if known.
    pub fn percent(&self) -> Option<u8> {
        self.progress
            .map(|p| (p.clamp(0.0, 1.0) * 100.0).round() as u8)
    }

    /// Strip the timestamps, producing a payload that can be re-registered.
    pub fn to_new_run(&self) -> NewRun {
        NewRun {
            id: self.id.clone(),
            tool: self.tool.clone(),
            status: self.status,
            progress: self.progress,
            stage: self.stage.clone(),
            message: self.message.clone(),
            route: self.route.clone(),
            parent_run_id: self.parent_run_id.clone(),
        }
    }
}

/// Registration payload: a run record without timestamps. The store stamps
/// `created_at`/`updated_at` when the payload is written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub id: String,
    pub tool: Tool,
    pub status: RunStatus,
    pub progress: Option<f64>,
    pub stage: String,
    pub message: String,
    pub route: Option<String>,
    pub parent_run_id: Option<String>,
}

impl NewRun {
    /// Optimistic record for a job the client has just started.
    pub fn started(id: impl Into<String>, tool: Tool) -> Self {
        Self {
            id: id.into(),
            tool,
            status: RunStatus::Running,
            progress: Some(0.0),
            stage: "starting".to_string(),
            message: "Initializing...".to_string(),
            route: None,
            parent_run_id: None,
        }
    }

    /// Optimistic record with a locally generated id, used before the server
    /// has answered the start request.
    pub fn placeholder(tool: Tool) -> Self {
        Self::started(format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4()), tool)
    }

    pub fn with_parent(mut self, parent_run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent_run_id.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn into_record(self, created_at: f64, updated_at: f64) -> RunRecord {
        RunRecord {
            id: self.id,
            tool: self.tool,
            status: self.status,
            progress: self.progress.map(|p| p.clamp(0.0, 1.0)),
            stage: self.stage,
            message: self.message,
            created_at,
            updated_at,
            route: self.route,
            parent_run_id: self.parent_run_id,
        }
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
