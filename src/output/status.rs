//! Run status display.
//!
//! Output functions for run tables, the running-jobs banner, and single-run
//! details.

use crate::routes::route_for;
use crate::run::{FailureReason, RunRecord, RunStatus};

use super::colors::*;

const BAR_WIDTH: usize = 20;

/// Create a progress bar string: `completed` of `total` cells filled.
pub fn make_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return " ".repeat(width);
    }
    let filled = (completed.min(total) * width) / total;
    let empty = width - filled;
    format!(
        "{GREEN}{}{RESET}{GRAY}{}{RESET}",
        "█".repeat(filled),
        "░".repeat(empty)
    )
}

/// Colored, fixed-meaning label for a run status.
pub fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Queued => format!("{GRAY}[queued]{RESET}"),
        RunStatus::Running => format!("{CYAN}[running]{RESET}"),
        RunStatus::Succeeded => format!("{GREEN}[succeeded]{RESET}"),
        RunStatus::Failed(FailureReason::Cancelled) => format!("{YELLOW}[cancelled]{RESET}"),
        RunStatus::Failed(reason) => {
            let detail = match reason {
                FailureReason::ServerError => "failed",
                FailureReason::Stale => "stale",
                FailureReason::Timeout => "timeout",
                FailureReason::ConnectivityError => "connectivity",
                FailureReason::Cancelled => "cancelled",
            };
            format!("{RED}[{}]{RESET}", detail)
        }
    }
}

/// Human-friendly duration: `12s`, `3m 04s`, `1h 02m`.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    if hours > 0 {
        format!("{}h {:02}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

fn progress_cell(run: &RunRecord) -> String {
    match run.percent() {
        Some(pct) => format!(
            "{} {:>3}%",
            make_progress_bar(pct as usize, 100, BAR_WIDTH),
            pct
        ),
        None => format!("{}  {GRAY}-{RESET}", " ".repeat(BAR_WIDTH)),
    }
}

/// One table row for `run`, as of `now` (Unix seconds).
pub fn format_run_row(run: &RunRecord, now: f64) -> String {
    let stage = if run.stage.is_empty() {
        String::new()
    } else {
        format!(" {DIM}{}{RESET}", run.stage)
    };
    format!(
        "  {BOLD}{}{RESET} {GRAY}{}{RESET} {} {}{} {GRAY}{} ago{RESET}",
        run.id,
        run.tool,
        status_label(run.status),
        progress_cell(run),
        stage,
        format_duration(run.age_secs(now) as u64)
    )
}

/// Print a table of runs, in the order given.
pub fn print_run_table(title: &str, runs: &[RunRecord], now: f64) {
    if runs.is_empty() {
        println!("{GRAY}No runs tracked.{RESET}");
        return;
    }
    println!("{BOLD}{}{RESET} ({})", title, runs.len());
    println!();
    for run in runs {
        println!("{}", format_run_row(run, now));
        let route = route_for(run);
        println!("    {GRAY}-> {}{RESET}", route);
    }
}

/// Banner text for the running-jobs notification, or `None` when nothing
/// should be shown.
pub fn format_banner(visible: &[RunRecord]) -> Option<String> {
    if visible.is_empty() {
        return None;
    }
    let mut out = format!(
        "{CYAN}{BOLD}{} job{} running{RESET}",
        visible.len(),
        if visible.len() == 1 { "" } else { "s" }
    );
    for run in visible {
        let pct = run
            .percent()
            .map(|p| format!(" {}%", p))
            .unwrap_or_default();
        out.push_str(&format!(
            "\n  {CYAN}●{RESET} {} {GRAY}{}{RESET}{}",
            run.tool, run.id, pct
        ));
        if !run.message.is_empty() {
            out.push_str(&format!(" {DIM}{}{RESET}", run.message));
        }
    }
    Some(out)
}

/// Print everything known about one run.
pub fn print_run_detail(run: &RunRecord, now: f64) {
    println!("{BLUE}Run ID:{RESET}    {}", run.id);
    println!("{BLUE}Tool:{RESET}      {}", run.tool);
    println!("{BLUE}Status:{RESET}    {}", status_label(run.status));
    if let Some(pct) = run.percent() {
        println!("{BLUE}Progress:{RESET}  {}%", pct);
    }
    if !run.stage.is_empty() {
        println!("{BLUE}Stage:{RESET}     {}", run.stage);
    }
    if !run.message.is_empty() {
        println!("{BLUE}Message:{RESET}   {}", run.message);
    }
    if let Some(parent) = &run.parent_run_id {
        println!("{BLUE}Parent:{RESET}    {}", parent);
    }
    println!(
        "{BLUE}Age:{RESET}       {}",
        format_duration(run.age_secs(now) as u64)
    );
    println!("{BLUE}Route:{RESET}     {}", route_for(run));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{NewRun, Tool};

    fn record(id: &str, tool: Tool, status: RunStatus, progress: Option<f64>) -> RunRecord {
        let mut run = NewRun::started(id, tool)
            .with_status(status)
            .into_record(100.0, 100.0);
        run.progress = progress;
        run
    }

    #[test]
    fn test_make_progress_bar_fills_proportionally() {
        let bar = make_progress_bar(50, 100, 10);
        assert_eq!(bar.matches('█').count(), 5);
        assert_eq!(bar.matches('░').count(), 5);
        assert_eq!(make_progress_bar(150, 100, 4).matches('█').count(), 4);
        assert_eq!(make_progress_bar(0, 0, 3), "   ");
    }

    #[test]
    fn test_status_labels() {
        assert!(status_label(RunStatus::Running).contains("[running]"));
        assert!(status_label(RunStatus::Failed(FailureReason::Stale)).contains("[stale]"));
        assert!(status_label(RunStatus::Failed(FailureReason::Cancelled)).contains("[cancelled]"));
        assert!(status_label(RunStatus::Failed(FailureReason::ServerError)).contains("[failed]"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(64), "1m 04s");
        assert_eq!(format_duration(3720), "1h 02m");
    }

    #[test]
    fn test_run_row_includes_percent_and_age() {
        let run = record("r1", Tool::Trainer, RunStatus::Running, Some(0.42));
        let row = format_run_row(&run, 112.0);
        assert!(row.contains("r1"));
        assert!(row.contains("trainer"));
        assert!(row.contains(" 42%"));
        assert!(row.contains("12s ago"));
    }

    #[test]
    fn test_banner_hidden_when_nothing_visible() {
        assert_eq!(format_banner(&[]), None);
    }

    #[test]
    fn test_banner_counts_jobs() {
        let runs = vec![
            record("a", Tool::Backtester, RunStatus::Running, Some(0.1)),
            record("b", Tool::Trainer, RunStatus::Running, None),
        ];
        let banner = format_banner(&runs).unwrap();
        assert!(banner.contains("2 jobs running"));
        assert!(banner.contains("backtester"));
        assert!(banner.contains("10%"));
    }
}
