use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// Lifecycle state of a single stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
    Skipped,
    /// A previous success whose underlying alert data has since changed.
    Stale,
}

impl StageState {
    /// Terminal for one attempt: the run will not change again without a new trigger.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Stale => "stale",
        }
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token accounting reported by an AI backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// The unit of execution state for one `(alert, stage)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRun {
    pub alert_id: String,
    pub stage: Stage,
    /// Cumulative attempt counter; 0 means the stage never ran.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<Uuid>,
    pub state: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Human-readable summary of the terminal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    /// Last raw backend error, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Model-reported confidence on a 0-100 scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Reference used by reviewers to address this run's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_expires_at: Option<DateTime<Utc>>,
}

impl StageRun {
    /// A stage that has never been triggered.
    pub fn idle(alert_id: &str, stage: Stage) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            stage,
            attempt: 0,
            claim_token: None,
            state: StageState::Idle,
            started_at: None,
            finished_at: None,
            result: None,
            error_summary: None,
            raw_error: None,
            skip_reason: None,
            confidence: None,
            token_usage: None,
            latency_ms: None,
            output_ref: None,
            claim_expires_at: None,
        }
    }

    /// A freshly claimed run.
    pub fn running(
        alert_id: &str,
        stage: Stage,
        attempt: u32,
        claim_token: Uuid,
        claim_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt,
            claim_token: Some(claim_token),
            state: StageState::Running,
            started_at: Some(Utc::now()),
            claim_expires_at: Some(claim_expires_at),
            ..Self::idle(alert_id, stage)
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.state == StageState::Succeeded
    }
}

/// Derived status of all stages for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    NotStarted,
    Partial,
    Complete,
    Failed,
}

impl OverallStatus {
    /// Derive the overall status from the latest run of each stage.
    ///
    /// `complete` requires every analysis stage plus at least one
    /// orchestration transport to have succeeded.
    pub fn derive(runs: &BTreeMap<Stage, StageRun>) -> Self {
        let state_of = |stage: Stage| runs.get(&stage).map(|r| r.state).unwrap_or_default();

        if runs.values().all(|r| r.state == StageState::Idle) {
            return Self::NotStarted;
        }

        let analysis_done = Stage::ANALYSIS
            .iter()
            .all(|s| state_of(*s) == StageState::Succeeded);
        let orchestration_done = [Stage::OrchestrationApi, Stage::OrchestrationMcp]
            .iter()
            .any(|s| state_of(*s) == StageState::Succeeded);
        if analysis_done && orchestration_done {
            return Self::Complete;
        }

        let any_running = runs.values().any(|r| r.state.is_running());
        let any_failed = runs.values().any(|r| r.state == StageState::Failed);
        if any_failed && !any_running {
            return Self::Failed;
        }

        Self::Partial
    }
}

/// Everything the engine knows about one alert's analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertAnalysisRecord {
    pub alert_id: String,
    pub runs: BTreeMap<Stage, StageRun>,
    pub overall_status: OverallStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertAnalysisRecord {
    pub fn new(alert_id: &str) -> Self {
        let now = Utc::now();
        Self {
            alert_id: alert_id.to_string(),
            runs: BTreeMap::new(),
            overall_status: OverallStatus::NotStarted,
            created_at: now,
            updated_at: now,
        }
    }

    /// Latest run for a stage, or an idle placeholder.
    pub fn run(&self, stage: Stage) -> StageRun {
        self.runs
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| StageRun::idle(&self.alert_id, stage))
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.runs.get(&stage).map(|r| r.state).unwrap_or_default()
    }

    /// Replace the latest run for its stage and refresh the derived status.
    pub fn put(&mut self, run: StageRun) {
        self.runs.insert(run.stage, run);
        self.overall_status = OverallStatus::derive(&self.runs);
        self.updated_at = Utc::now();
    }
}
