use crate::output::{format_duration, GREEN, RED, RESET, YELLOW};
use crate::run::FailureReason;
use crate::tracker::{Indicator, ProgressView, TrackerPhase};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";
const BAR_TEMPLATE: &str = "{prefix:.bold} [{bar:30.green/white}] {pos:>3}% {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:.bold} {spinner:.cyan} {msg}";
const MAX_MESSAGE_CHARS: usize = 60;

/// Terminal rendering of one tracked run.
///
/// Determinate progress shows a percentage bar; the indeterminate state
/// swaps in a spinner so a stalled run still looks alive.
pub struct RunProgressBar {
    bar: ProgressBar,
    mode: Option<Indicator>,
}

impl RunProgressBar {
    pub fn new(label: &str) -> Self {
        Self::with_bar(ProgressBar::new(100), label)
    }

    /// A bar that draws nowhere, for tests and non-interactive output.
    pub fn hidden(label: &str) -> Self {
        Self::with_bar(ProgressBar::hidden(), label)
    }

    fn with_bar(bar: ProgressBar, label: &str) -> Self {
        bar.set_length(100);
        bar.set_prefix(label.to_string());
        Self { bar, mode: None }
    }

    pub fn update(&mut self, view: &ProgressView) {
        if self.mode != Some(view.indicator) {
            self.apply_style(view.indicator);
        }
        self.bar.set_position(view.display_progress.round().clamp(0.0, 100.0) as u64);
        self.bar.set_message(status_line(view));
    }

    /// Leave the final state on screen.
    pub fn finish(&mut self, view: &ProgressView) {
        self.apply_style(Indicator::Determinate);
        self.bar.set_position(view.display_progress.round().clamp(0.0, 100.0) as u64);
        self.bar.finish_with_message(outcome_line(view));
    }

    /// Remove the bar without a final message.
    pub fn abandon(&mut self) {
        self.bar.abandon();
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn is_spinning(&self) -> bool {
        self.mode == Some(Indicator::Indeterminate)
    }

    fn apply_style(&mut self, indicator: Indicator) {
        match indicator {
            Indicator::Determinate => {
                self.bar.disable_steady_tick();
                self.bar.set_style(
                    ProgressStyle::with_template(BAR_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▓░"),
                );
            }
            Indicator::Indeterminate => {
                self.bar.set_style(
                    ProgressStyle::with_template(SPINNER_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_chars(SPINNER_CHARS),
                );
                self.bar.enable_steady_tick(Duration::from_millis(80));
            }
        }
        self.mode = Some(indicator);
    }
}

/// Message shown next to a live bar: stage, message, elapsed time.
pub fn status_line(view: &ProgressView) -> String {
    let mut parts = Vec::new();
    if !view.stage.is_empty() {
        parts.push(view.stage.clone());
    }
    if !view.message.is_empty() && view.message != view.stage {
        parts.push(truncate(&view.message, MAX_MESSAGE_CHARS));
    }
    parts.push(format!("[{}]", format_duration(view.elapsed.as_secs())));
    parts.join(" | ")
}

/// Final one-line outcome for a finished run.
pub fn outcome_line(view: &ProgressView) -> String {
    let elapsed = format_duration(view.elapsed.as_secs());
    match &view.phase {
        TrackerPhase::Succeeded => format!("{GREEN}Completed in {}{RESET}", elapsed),
        TrackerPhase::Failed {
            reason: FailureReason::Cancelled,
            message,
        } => format!("{YELLOW}Cancelled after {}: {}{RESET}", elapsed, message),
        TrackerPhase::Failed { message, .. } => {
            format!("{RED}Failed after {}: {}{RESET}", elapsed, message)
        }
        TrackerPhase::Running => format!("Stopped after {}", elapsed),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= max_chars {
        return first_line.to_string();
    }
    let cut: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(progress: f64, indicator: Indicator, phase: TrackerPhase) -> ProgressView {
        ProgressView {
            run_id: "r1".to_string(),
            display_progress: progress,
            server_progress: None,
            indicator,
            phase,
            stage: "training".to_string(),
            message: "Epoch 3/10".to_string(),
            elapsed: Duration::from_secs(75),
        }
    }

    #[test]
    fn test_bar_tracks_display_progress() {
        let mut bar = RunProgressBar::hidden("r1");
        bar.update(&view(41.6, Indicator::Determinate, TrackerPhase::Running));
        assert_eq!(bar.position(), 42);
        assert!(!bar.is_spinning());
    }

    #[test]
    fn test_indeterminate_switches_to_spinner_and_back() {
        let mut bar = RunProgressBar::hidden("r1");
        bar.update(&view(30.0, Indicator::Indeterminate, TrackerPhase::Running));
        assert!(bar.is_spinning());
        bar.update(&view(35.0, Indicator::Determinate, TrackerPhase::Running));
        assert!(!bar.is_spinning());
        bar.abandon();
    }

    #[test]
    fn test_status_line_parts() {
        let line = status_line(&view(10.0, Indicator::Determinate, TrackerPhase::Running));
        assert_eq!(line, "training | Epoch 3/10 | [1m 15s]");
    }

    #[test]
    fn test_outcome_lines() {
        let done = outcome_line(&view(100.0, Indicator::Determinate, TrackerPhase::Succeeded));
        assert!(done.contains("Completed in 1m 15s"));

        let failed = outcome_line(&view(
            50.0,
            Indicator::Determinate,
            TrackerPhase::Failed {
                reason: FailureReason::Timeout,
                message: "gave up".to_string(),
            },
        ));
        assert!(failed.contains("Failed after 1m 15s: gave up"));
    }

    #[test]
    fn test_truncate_long_messages() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 20), "line one");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
