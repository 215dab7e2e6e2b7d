//! Normalization of tool-specific status bodies into one canonical shape.
//!
//! Each tool endpoint grew its own field names (`percent` vs `progress` vs
//! `pct`, fractions vs percentages, nested `progress` objects). All of that is
//! absorbed here; the rest of the crate only sees [`ToolStatus`].

use crate::run::{FailureReason, RunStatus, Tool};
use serde_json::{Map, Value};

const PHASE_KEYS: &[&str] = &["phase", "status", "state", "stage"];
const PERCENT_KEYS: &[&str] = &["percent", "progress", "pct", "percentage"];
const ELAPSED_KEYS: &[&str] = &["elapsed_s", "elapsed", "elapsed_seconds"];
const MESSAGE_KEYS: &[&str] = &["message", "detail"];
const ERROR_KEYS: &[&str] = &["error_message", "error", "detail"];

/// Coarse phase of a job as reported by its status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl Phase {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "done" | "completed" | "succeeded" | "success" => Phase::Done,
            "error" | "failed" => Phase::Error,
            "cancelled" | "canceled" => Phase::Cancelled,
            "queued" | "ready" | "pending" => Phase::Queued,
            _ => Phase::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error | Phase::Cancelled)
    }

    pub fn to_status(&self) -> RunStatus {
        match self {
            Phase::Queued => RunStatus::Queued,
            Phase::Running => RunStatus::Running,
            Phase::Done => RunStatus::Succeeded,
            Phase::Error => RunStatus::Failed(FailureReason::ServerError),
            Phase::Cancelled => RunStatus::Failed(FailureReason::Cancelled),
        }
    }
}

/// How a tool reports progress numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressScale {
    /// 0-100
    Percent,
    /// 0-1
    Fraction,
}

pub fn progress_scale(tool: &Tool) -> ProgressScale {
    match tool {
        Tool::LabelingOptimizer | Tool::TrainingChartGenerator | Tool::Trainer => {
            ProgressScale::Percent
        }
        Tool::Analysis | Tool::Backtester | Tool::Other(_) => ProgressScale::Fraction,
    }
}

/// Canonical status observation for one poll of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolStatus {
    pub phase: Phase,
    /// Percentage in `[0,100]`; `None` when the body had no usable number.
    pub percent: Option<f64>,
    pub elapsed_s: Option<f64>,
    /// Raw phase label, kept for display.
    pub stage: String,
    pub message: String,
    pub error_message: Option<String>,
}

impl ToolStatus {
    pub fn status(&self) -> RunStatus {
        self.phase.to_status()
    }

    /// Best human-readable explanation for a failed observation.
    pub fn failure_detail(&self) -> String {
        self.error_message
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| Some(self.message.clone()).filter(|m| !m.is_empty()))
            .unwrap_or_else(|| "The job failed on the server".to_string())
    }
}

/// Normalize a status body returned by `tool`'s endpoint.
pub fn normalize_status(tool: &Tool, body: &Value) -> ToolStatus {
    let empty = Map::new();
    let top = body.as_object().unwrap_or(&empty);
    // Trainer-style bodies nest the interesting fields under `progress`.
    let nested = top.get("progress").and_then(Value::as_object);

    let phase_label = nested
        .and_then(|n| first_str(n, &["phase"]))
        .or_else(|| first_str(top, PHASE_KEYS))
        .unwrap_or_default();

    let raw_percent = nested
        .and_then(|n| first_number(n, PERCENT_KEYS))
        .or_else(|| first_number(top, PERCENT_KEYS));
    // Nested progress objects always carry percentages, whatever the tool.
    let scale = if nested.is_some() {
        ProgressScale::Percent
    } else {
        progress_scale(tool)
    };
    let percent = raw_percent.and_then(|value| scale_percent(value, scale));

    let message = nested
        .and_then(|n| first_str(n, MESSAGE_KEYS))
        .or_else(|| first_str(top, MESSAGE_KEYS))
        .unwrap_or_default();

    let error_message = first_str(top, ERROR_KEYS)
        .or_else(|| nested.and_then(|n| first_str(n, ERROR_KEYS)))
        .filter(|m| !m.is_empty());

    let elapsed_s = first_number(top, ELAPSED_KEYS)
        .or_else(|| nested.and_then(|n| first_number(n, ELAPSED_KEYS)))
        .filter(|e| e.is_finite() && *e >= 0.0);

    ToolStatus {
        phase: Phase::parse(&phase_label),
        percent,
        elapsed_s,
        stage: phase_label,
        message,
        error_message,
    }
}

fn scale_percent(value: f64, scale: ProgressScale) -> Option<f64> {
    let percent = match scale {
        ProgressScale::Percent => value,
        ProgressScale::Fraction => value * 100.0,
    };
    (percent.is_finite() && (0.0..=100.0).contains(&percent)).then_some(percent)
}

fn first_str(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn first_number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_f64))
}
