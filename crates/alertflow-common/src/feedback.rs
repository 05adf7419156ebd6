use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// A reviewer's judgement of a stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    Partial,
}

impl Verdict {
    /// Correction signal on the 0-100 confidence scale.
    pub fn score(&self) -> f64 {
        match self {
            Verdict::Correct => 100.0,
            Verdict::Partial => 50.0,
            Verdict::Incorrect => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Correct => "correct",
            Verdict::Incorrect => "incorrect",
            Verdict::Partial => "partial",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of human verification for one stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub alert_id: String,
    pub stage: Stage,
    pub output_ref: String,
    pub verdict: Verdict,
    pub reviewer_id: String,
    #[serde(default)]
    pub notes: String,
    pub submitted_at: DateTime<Utc>,
    /// Confidence after applying every verdict recorded for the same output.
    pub verified_confidence: f64,
}

impl FeedbackRecord {
    pub fn has_notes(&self) -> bool {
        !self.notes.trim().is_empty()
    }
}
