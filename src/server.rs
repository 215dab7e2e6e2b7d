//! Client for the remote job server.

use crate::error::{Result, RunwatchError};
use crate::run::{RunRecord, Tool};
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Operations the run-tracking core needs from the job server.
pub trait RunServer: Send + Sync {
    /// `GET /runs/active`
    fn fetch_active_runs(&self) -> Result<Vec<RunRecord>>;

    /// `GET /runs/{id}`; `Ok(None)` when the server does not know the run.
    fn fetch_run(&self, id: &str) -> Result<Option<RunRecord>>;

    /// `GET /runs?limit=N`, newest first.
    fn fetch_recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;

    /// Raw body of the tool-specific status endpoint for `run`.
    fn fetch_tool_status(&self, run: &RunRecord) -> Result<Value>;

    /// Ask the server to cancel `run`.
    fn cancel(&self, run: &RunRecord) -> Result<()>;

    fn health(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct RunList {
    #[serde(default)]
    runs: Vec<RunRecord>,
}

/// Path of the status endpoint that reports live progress for `run`.
pub fn status_path(run: &RunRecord) -> String {
    match &run.tool {
        Tool::LabelingOptimizer => format!("/api/labeling-optimizer/progress/{}", run.id),
        Tool::TrainingChartGenerator => {
            format!("/api/training-chart-generator/progress/{}", run.id)
        }
        Tool::Trainer => format!("/trainer/runs/{}", run.id),
        Tool::Analysis => match run.parent_run_id.as_deref() {
            Some(parent) if !parent.is_empty() => {
                format!("/trainer/runs/{}/analysis/{}", parent, run.id)
            }
            _ => format!("/runs/{}", run.id),
        },
        Tool::Backtester => format!("/runs/backtester/{}/status", run.id),
        Tool::Other(_) => format!("/runs/{}", run.id),
    }
}

/// Path of the cancel endpoint for `run`, if its tool has one.
pub fn cancel_path(run: &RunRecord) -> Option<String> {
    match run.tool {
        Tool::TrainingChartGenerator => {
            Some(format!("/api/training-chart-generator/cancel/{}", run.id))
        }
        _ => None,
    }
}

/// [`RunServer`] over HTTP.
pub struct HttpRunServer {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRunServer {
    pub fn new(base_url: &str, connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .timeout_write(read_timeout)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.agent.get(&url).call().map_err(map_ureq_error)?;
        let bytes = read_limited(response)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl RunServer for HttpRunServer {
    fn fetch_active_runs(&self) -> Result<Vec<RunRecord>> {
        let list: RunList = serde_json::from_value(self.get_json("/runs/active")?)?;
        Ok(list.runs)
    }

    fn fetch_run(&self, id: &str) -> Result<Option<RunRecord>> {
        match self.get_json(&format!("/runs/{}", id)) {
            Ok(body) => Ok(Some(serde_json::from_value(body)?)),
            Err(RunwatchError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn fetch_recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let list: RunList = serde_json::from_value(self.get_json(&format!("/runs?limit={}", limit))?)?;
        Ok(list.runs)
    }

    fn fetch_tool_status(&self, run: &RunRecord) -> Result<Value> {
        self.get_json(&status_path(run))
    }

    fn cancel(&self, run: &RunRecord) -> Result<()> {
        let path = cancel_path(run)
            .ok_or_else(|| RunwatchError::CancelUnsupported(run.tool.to_string()))?;
        let url = self.url(&path);
        debug!(%url, "POST");
        self.agent
            .post(&url)
            .send_string("")
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn health(&self) -> Result<()> {
        self.get_json("/").map(|_| ())
    }
}

fn map_ureq_error(err: ureq::Error) -> RunwatchError {
    match err {
        ureq::Error::Status(404, response) => {
            RunwatchError::NotFound(response.get_url().to_string())
        }
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            RunwatchError::Http {
                status,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            }
        }
        ureq::Error::Transport(transport) => RunwatchError::Transport(transport.to_string()),
    }
}

fn read_limited(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES as u64 + 1)
        .read_to_end(&mut bytes)?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(RunwatchError::Transport(format!(
            "Response exceeded {} bytes",
            MAX_RESPONSE_BYTES
        )));
    }
    Ok(bytes)
}
