//! Outcome tracking for one-click runs.

use alertflow_common::{Stage, StageRun, StageState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Final outcome of one stage within a one-click run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    pub state: StageState,
    pub attempt: u32,
    /// Whether the stage was already succeeded before the run began
    #[serde(default)]
    pub satisfied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StageOutcome {
    pub fn from_run(run: &StageRun) -> Self {
        Self {
            state: run.state,
            attempt: run.attempt,
            satisfied: false,
            error: run.error_summary.clone(),
            skip_reason: run.skip_reason.clone(),
        }
    }

    pub fn satisfied(run: &StageRun) -> Self {
        Self {
            satisfied: true,
            ..Self::from_run(run)
        }
    }
}

/// Summary of a one-click run: counts per terminal state, wall-clock
/// duration and the analyst time the run is estimated to have saved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub alert_id: String,
    pub total_stages: usize,
    /// Stages that ran in this walk (succeeded + failed)
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Stages already succeeded before the walk started
    pub satisfied: usize,
    #[serde(with = "duration_serde", rename = "durationMs")]
    pub duration: Duration,
    pub estimated_minutes_saved: f64,
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageOutcome>,
}

impl RunSummary {
    pub fn new(alert_id: &str, total_stages: usize) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            total_stages,
            ..Default::default()
        }
    }

    pub fn add_outcome(&mut self, stage: Stage, outcome: StageOutcome) {
        if outcome.satisfied {
            self.satisfied += 1;
        } else {
            match outcome.state {
                StageState::Succeeded => {
                    self.attempted += 1;
                    self.succeeded += 1;
                }
                StageState::Failed => {
                    self.attempted += 1;
                    self.failed += 1;
                }
                StageState::Skipped => self.skipped += 1,
                _ => {}
            }
        }
        self.stages.insert(stage, outcome);
    }

    /// Stages that succeeded during this run, excluding satisfied ones.
    pub fn succeeded_stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages
            .iter()
            .filter(|(_, o)| !o.satisfied && o.state == StageState::Succeeded)
            .map(|(s, _)| *s)
    }

    /// Record elapsed time and the time-saved estimate from per-stage
    /// manual effort minutes, floored at zero.
    pub fn finish<F>(&mut self, elapsed: Duration, manual_minutes: F)
    where
        F: Fn(Stage) -> u32,
    {
        self.duration = elapsed;
        let manual: u32 = self.succeeded_stages().map(manual_minutes).sum();
        let saved = manual as f64 - elapsed.as_secs_f64() / 60.0;
        self.estimated_minutes_saved = (saved.max(0.0) * 10.0).round() / 10.0;
    }

    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
