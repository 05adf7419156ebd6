//! Terminal progress for one-click runs.
//!
//! Output modes:
//! - `full`: one spinner per stage with colored outcomes
//! - `minimal`: one line per terminal transition
//! - `json`: each progress event as a JSON line, then the run summary

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use alertflow_common::{ProgressEvent, Stage, StageState};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::dag::RunSummary;
use crate::ui::icons::{CHECK, CLOCK, CROSS, RUNNING, SKIP, SPARKLE, STALE};

/// Output mode for the stage UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Spinners and colors
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON lines for machine consumption
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Renders progress events for a single alert.
pub struct StageProgressUi {
    mode: UiMode,
    multi: MultiProgress,
    header: ProgressBar,
    bars: Mutex<HashMap<Stage, ProgressBar>>,
    verbose: bool,
    term: Term,
}

impl StageProgressUi {
    pub fn new(alert_id: &str, total_stages: usize, mode: UiMode, verbose: bool) -> Self {
        let multi = match mode {
            UiMode::Full => MultiProgress::new(),
            _ => MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        };
        let header = multi.add(ProgressBar::new(total_stages as u64));
        header.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        header.set_prefix(format!("alert {}", alert_id));

        Self {
            mode,
            multi,
            header,
            bars: Mutex::new(HashMap::new()),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn handle_event(&self, event: &ProgressEvent) {
        match self.mode {
            UiMode::Json => {
                if let Ok(json) = serde_json::to_string(event) {
                    let _ = writeln!(&self.term, "{}", json);
                }
            }
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_minimal(&self, event: &ProgressEvent) {
        let line = match event.state {
            StageState::Succeeded => format!("ok   {}", event.stage),
            StageState::Failed => format!(
                "fail {} ({})",
                event.stage,
                payload_str(event, "error").unwrap_or("failed")
            ),
            StageState::Skipped => format!(
                "skip {} ({})",
                event.stage,
                payload_str(event, "reason").unwrap_or("skipped")
            ),
            StageState::Stale => format!("stale {}", event.stage),
            StageState::Running if self.verbose => format!("run  {}", event.stage),
            _ => return,
        };
        let _ = writeln!(&self.term, "{}", line);
    }

    fn handle_full(&self, event: &ProgressEvent) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        match event.state {
            StageState::Running => {
                let bar = bars.entry(event.stage).or_insert_with(|| {
                    let bar = self.multi.add(ProgressBar::new_spinner());
                    bar.set_style(bar_style("  {spinner:.cyan} {prefix:.bold} {msg}"));
                    bar.set_prefix(event.stage.to_string());
                    bar.enable_steady_tick(Duration::from_millis(100));
                    bar
                });
                let message = match payload_str(event, "error") {
                    Some(error) if is_retry(event) => format!(
                        "{} retrying ({})",
                        RUNNING,
                        style(error).yellow()
                    ),
                    _ => format!("{} running", RUNNING),
                };
                bar.set_message(message);
            }
            StageState::Succeeded | StageState::Failed | StageState::Skipped => {
                let (icon, text) = match event.state {
                    StageState::Succeeded => (CHECK, style("succeeded".to_string()).green()),
                    StageState::Failed => (
                        CROSS,
                        style(format!(
                            "failed: {}",
                            payload_str(event, "error").unwrap_or("unknown error")
                        ))
                        .red(),
                    ),
                    _ => (
                        SKIP,
                        style(format!(
                            "skipped: {}",
                            payload_str(event, "reason").unwrap_or("upstream failed")
                        ))
                        .yellow(),
                    ),
                };
                let line = format!("  {}{} {}", icon, style(event.stage).bold(), text);
                match bars.remove(&event.stage) {
                    Some(bar) => {
                        bar.set_style(bar_style("  {msg}"));
                        bar.finish_with_message(line);
                    }
                    None => {
                        self.multi.println(line).ok();
                    }
                }
                self.header.inc(1);
            }
            StageState::Stale => {
                self.multi
                    .println(format!("  {}{} stale", STALE, style(event.stage).dim()))
                    .ok();
            }
            StageState::Idle => {}
        }
    }

    /// Print the final summary.
    pub fn finish(&self, summary: &RunSummary) {
        if self.mode == UiMode::Json {
            if let Ok(json) = serde_json::to_string(summary) {
                let _ = writeln!(&self.term, "{}", json);
            }
            return;
        }
        self.header.finish_and_clear();

        let mut lines = Vec::new();
        if self.mode == UiMode::Full {
            lines.push(String::new());
            lines.push(if summary.all_success() {
                format!("{}One-click analysis {}", SPARKLE, style("COMPLETE").green().bold())
            } else {
                format!("{}One-click analysis {}", CROSS, style("INCOMPLETE").red().bold())
            });
        }
        lines.push(format!(
            "{}{} succeeded, {} failed, {} skipped, {} already done ({})",
            CLOCK,
            style(summary.succeeded).green(),
            style(summary.failed).red(),
            style(summary.skipped).yellow(),
            summary.satisfied,
            format_duration(summary.duration)
        ));
        lines.push(format!(
            "   Estimated analyst time saved: {} min",
            style(summary.estimated_minutes_saved).cyan()
        ));
        for line in lines {
            let _ = writeln!(&self.term, "{}", line);
        }
    }
}

fn payload_str<'a>(event: &'a ProgressEvent, key: &str) -> Option<&'a str> {
    event.payload.as_ref()?.get(key)?.as_str()
}

fn is_retry(event: &ProgressEvent) -> bool {
    event
        .payload
        .as_ref()
        .and_then(|p| p.get("retrying"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
