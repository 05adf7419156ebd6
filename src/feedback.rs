//! Append-only ledger of analyst verification feedback.
//!
//! Feedback addresses a specific stage output through its `output_ref`.
//! Every submission recomputes the verified confidence from the model's own
//! confidence and all verdicts recorded for that output, and the latest
//! record decides whether the output may be exported as training data.
//! A verdict only counts while its output is the stage's current succeeded
//! result; re-running the stage leaves the new output unreviewed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use alertflow_common::{FeedbackRecord, Stage, StageRun, Verdict};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::OrchestratorError;

/// Confidence assumed when the backend reported none.
pub const DEFAULT_MODEL_CONFIDENCE: f64 = 50.0;

/// Read access to the latest run of a stage.
pub trait RunLookup: Send + Sync {
    fn stage_run(&self, alert_id: &str, stage: Stage) -> Option<StageRun>;
}

/// A reviewer's submission, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub stage: Stage,
    pub output_ref: String,
    pub verdict: Verdict,
    pub reviewer_id: String,
    #[serde(default)]
    pub notes: String,
}

/// One exportable `(alert, stage)` output with its latest verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCandidate {
    pub alert_id: String,
    pub stage: Stage,
    pub record: FeedbackRecord,
}

type LedgerKey = (String, Stage);

pub struct FeedbackLedger {
    runs: Arc<dyn RunLookup>,
    records: Mutex<HashMap<LedgerKey, Vec<FeedbackRecord>>>,
}

impl FeedbackLedger {
    pub fn new(runs: Arc<dyn RunLookup>) -> Self {
        Self {
            runs,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and append a feedback record.
    pub fn submit(
        &self,
        alert_id: &str,
        submission: FeedbackSubmission,
    ) -> Result<FeedbackRecord, OrchestratorError> {
        if submission.reviewer_id.trim().is_empty() {
            return Err(OrchestratorError::validation("reviewerId must not be empty"));
        }

        let run = self
            .runs
            .stage_run(alert_id, submission.stage)
            .filter(|run| run.is_succeeded())
            .filter(|run| run.output_ref.as_deref() == Some(submission.output_ref.as_str()))
            .ok_or_else(|| {
                OrchestratorError::validation(format!(
                    "no succeeded {} output {} for alert {alert_id}",
                    submission.stage, submission.output_ref
                ))
            })?;

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let history = records
            .entry((alert_id.to_string(), submission.stage))
            .or_default();

        let prior_scores: Vec<f64> = history
            .iter()
            .filter(|r| r.output_ref == submission.output_ref)
            .map(|r| r.verdict.score())
            .collect();
        let verified_confidence = verified_confidence(
            run.confidence,
            prior_scores
                .iter()
                .copied()
                .chain(std::iter::once(submission.verdict.score())),
        );

        let record = FeedbackRecord {
            alert_id: alert_id.to_string(),
            stage: submission.stage,
            output_ref: submission.output_ref,
            verdict: submission.verdict,
            reviewer_id: submission.reviewer_id,
            notes: submission.notes,
            submitted_at: Utc::now(),
            verified_confidence,
        };
        history.push(record.clone());

        info!(
            alert_id,
            stage = %record.stage,
            verdict = %record.verdict,
            verified_confidence,
            "feedback recorded"
        );
        Ok(record)
    }

    /// The record shown to users: latest `submitted_at`, later insertion
    /// wins ties.
    pub fn latest(&self, alert_id: &str, stage: Stage) -> Option<FeedbackRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .get(&(alert_id.to_string(), stage))
            .and_then(|history| latest_of(history))
            .cloned()
    }

    pub fn history(&self, alert_id: &str, stage: Stage) -> Vec<FeedbackRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .get(&(alert_id.to_string(), stage))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_export_eligible(&self, alert_id: &str, stage: Stage) -> bool {
        self.latest(alert_id, stage).is_some_and(|record| {
            record_is_eligible(&record) && self.reviews_current_output(&record)
        })
    }

    /// Latest record of every eligible `(alert, stage)`, ordered by key.
    pub fn export_candidates(&self) -> Vec<ExportCandidate> {
        let latest: Vec<FeedbackRecord> = {
            let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            records
                .values()
                .filter_map(|history| latest_of(history).cloned())
                .collect()
        };
        let mut candidates: Vec<ExportCandidate> = latest
            .into_iter()
            .filter(|record| record_is_eligible(record) && self.reviews_current_output(record))
            .map(|record| ExportCandidate {
                alert_id: record.alert_id.clone(),
                stage: record.stage,
                record,
            })
            .collect();
        candidates.sort_by(|a, b| (&a.alert_id, a.stage).cmp(&(&b.alert_id, b.stage)));
        candidates
    }

    /// Whether `record` addresses the output the stage currently holds.
    fn reviews_current_output(&self, record: &FeedbackRecord) -> bool {
        self.runs
            .stage_run(&record.alert_id, record.stage)
            .filter(|run| run.is_succeeded())
            .is_some_and(|run| run.output_ref.as_deref() == Some(record.output_ref.as_str()))
    }
}

fn latest_of(history: &[FeedbackRecord]) -> Option<&FeedbackRecord> {
    // max_by_key keeps the last of equal maxima
    history.iter().max_by_key(|r| r.submitted_at)
}

fn record_is_eligible(record: &FeedbackRecord) -> bool {
    match record.verdict {
        Verdict::Correct => true,
        Verdict::Partial | Verdict::Incorrect => record.has_notes(),
    }
}

/// `(model + sum(scores)) / (1 + n)`, rounded to one decimal.
pub fn verified_confidence(model: Option<f64>, scores: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = scores
        .into_iter()
        .fold((0.0, 0u32), |(sum, count), s| (sum + s, count + 1));
    let value = (model.unwrap_or(DEFAULT_MODEL_CONFIDENCE) + sum) / f64::from(1 + count);
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertflow_common::StageState;

    struct FixedRuns(Mutex<HashMap<LedgerKey, StageRun>>);

    impl FixedRuns {
        fn replace(&self, run: StageRun) {
            self.0
                .lock()
                .unwrap()
                .insert((run.alert_id.clone(), run.stage), run);
        }
    }

    impl RunLookup for FixedRuns {
        fn stage_run(&self, alert_id: &str, stage: Stage) -> Option<StageRun> {
            self.0.lock().unwrap().get(&(alert_id.to_string(), stage)).cloned()
        }
    }

    fn succeeded(alert_id: &str, stage: Stage, output_ref: &str, confidence: Option<f64>) -> StageRun {
        let mut run = StageRun::idle(alert_id, stage);
        run.attempt = 1;
        run.state = StageState::Succeeded;
        run.output_ref = Some(output_ref.to_string());
        run.confidence = confidence;
        run
    }

    fn fixed_runs(runs: Vec<StageRun>) -> Arc<FixedRuns> {
        let map = runs
            .into_iter()
            .map(|r| ((r.alert_id.clone(), r.stage), r))
            .collect();
        Arc::new(FixedRuns(Mutex::new(map)))
    }

    fn ledger(runs: Vec<StageRun>) -> FeedbackLedger {
        FeedbackLedger::new(fixed_runs(runs))
    }

    fn submission(output_ref: &str, verdict: Verdict, notes: &str) -> FeedbackSubmission {
        FeedbackSubmission {
            stage: Stage::Classification,
            output_ref: output_ref.to_string(),
            verdict,
            reviewer_id: "analyst-1".to_string(),
            notes: notes.to_string(),
        }
    }

    #[test]
    fn test_rejects_unknown_output() {
        let ledger = ledger(vec![succeeded("A1", Stage::Classification, "r1", Some(82.0))]);
        let err = ledger
            .submit("A1", submission("r-other", Verdict::Correct, ""))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(ledger.history("A1", Stage::Classification).is_empty());
    }

    #[test]
    fn test_rejects_run_that_is_not_succeeded() {
        let mut run = succeeded("A1", Stage::Classification, "r1", None);
        run.state = StageState::Stale;
        let ledger = ledger(vec![run]);
        assert!(ledger.submit("A1", submission("r1", Verdict::Correct, "")).is_err());
    }

    #[test]
    fn test_rejects_empty_reviewer() {
        let ledger = ledger(vec![succeeded("A1", Stage::Classification, "r1", None)]);
        let mut sub = submission("r1", Verdict::Correct, "");
        sub.reviewer_id = "  ".into();
        assert!(matches!(
            ledger.submit("A1", sub),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn test_verified_confidence_accumulates() {
        let ledger = ledger(vec![succeeded("A1", Stage::Classification, "r1", Some(82.0))]);

        let first = ledger.submit("A1", submission("r1", Verdict::Correct, "")).unwrap();
        assert_eq!(first.verified_confidence, 91.0);

        let second = ledger
            .submit("A1", submission("r1", Verdict::Incorrect, "wrong category"))
            .unwrap();
        assert_eq!(second.verified_confidence, 60.7);

        assert_eq!(ledger.history("A1", Stage::Classification).len(), 2);
        assert_eq!(
            ledger.latest("A1", Stage::Classification).map(|r| r.verdict),
            Some(Verdict::Incorrect)
        );
    }

    #[test]
    fn test_missing_model_confidence_defaults_to_fifty() {
        assert_eq!(verified_confidence(None, [50.0]), 50.0);
        assert_eq!(verified_confidence(Some(90.0), []), 90.0);
    }

    #[test]
    fn test_export_eligibility() {
        let ledger = ledger(vec![
            succeeded("A1", Stage::Classification, "r1", Some(82.0)),
            succeeded("A2", Stage::Classification, "r2", Some(70.0)),
        ]);
        assert!(!ledger.is_export_eligible("A1", Stage::Classification));

        ledger.submit("A1", submission("r1", Verdict::Partial, "")).unwrap();
        assert!(!ledger.is_export_eligible("A1", Stage::Classification));

        ledger
            .submit("A1", submission("r1", Verdict::Partial, "severity should be high"))
            .unwrap();
        assert!(ledger.is_export_eligible("A1", Stage::Classification));

        ledger.submit("A2", submission("r2", Verdict::Correct, "")).unwrap();
        let candidates = ledger.export_candidates();
        let ids: Vec<&str> = candidates.iter().map(|c| c.alert_id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "A2"]);
    }

    #[test]
    fn test_rerun_output_is_not_eligible_on_old_verdict() {
        let runs = fixed_runs(vec![succeeded("A1", Stage::Classification, "r1", Some(82.0))]);
        let ledger = FeedbackLedger::new(runs.clone());
        ledger.submit("A1", submission("r1", Verdict::Correct, "")).unwrap();
        assert!(ledger.is_export_eligible("A1", Stage::Classification));
        assert_eq!(ledger.export_candidates().len(), 1);

        runs.replace(succeeded("A1", Stage::Classification, "r2", Some(60.0)));
        assert!(!ledger.is_export_eligible("A1", Stage::Classification));
        assert!(ledger.export_candidates().is_empty());
        // The old verdict stays in the history.
        assert_eq!(ledger.history("A1", Stage::Classification).len(), 1);

        ledger.submit("A1", submission("r2", Verdict::Correct, "")).unwrap();
        assert!(ledger.is_export_eligible("A1", Stage::Classification));
    }

    #[test]
    fn test_stale_output_is_not_eligible() {
        let runs = fixed_runs(vec![succeeded("A1", Stage::Classification, "r1", None)]);
        let ledger = FeedbackLedger::new(runs.clone());
        ledger.submit("A1", submission("r1", Verdict::Correct, "")).unwrap();

        let mut stale = succeeded("A1", Stage::Classification, "r1", None);
        stale.state = StageState::Stale;
        runs.replace(stale);
        assert!(!ledger.is_export_eligible("A1", Stage::Classification));
    }
}
