//! Maps a run to the UI location that displays it.

use crate::run::{RunRecord, RunStatus, Tool};

pub const HOME_ROUTE: &str = "/";

/// Resolve the page that shows `run`, ignoring any route hint it carries.
pub fn resolve_route(run: &RunRecord) -> String {
    match &run.tool {
        Tool::LabelingOptimizer => match run.status {
            RunStatus::Queued | RunStatus::Running => {
                format!("/products/labeling-optimizer/run/{}", run.id)
            }
            RunStatus::Succeeded | RunStatus::Failed(_) => {
                format!("/products/labeling-optimizer/results/{}", run.id)
            }
        },
        // Progress renders inline on the tool page whatever the status.
        Tool::TrainingChartGenerator => "/products/training-chart-generator".to_string(),
        Tool::Trainer => "/tools/trainer".to_string(),
        Tool::Analysis => match run.parent_run_id.as_deref() {
            Some(parent) if !parent.is_empty() => format!("/tools/trainer/runs/{}/analysis", parent),
            _ => "/tools/trainer".to_string(),
        },
        Tool::Backtester => format!("/tools/backtester/runs/{}", run.id),
        Tool::Other(_) => HOME_ROUTE.to_string(),
    }
}

/// Tools whose page changes once the run finishes. A route hint is a single
/// fixed path, so it cannot follow that switch.
fn route_depends_on_status(tool: &Tool) -> bool {
    matches!(tool, Tool::LabelingOptimizer)
}

/// The route hint supplied at registration wins, except for tools whose page
/// depends on status; the resolver is the fallback.
pub fn route_for(run: &RunRecord) -> String {
    if route_depends_on_status(&run.tool) {
        return resolve_route(run);
    }
    match run.route.as_deref() {
        Some(route) if !route.is_empty() => route.to_string(),
        _ => resolve_route(run),
    }
}
