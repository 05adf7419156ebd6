use std::sync::Arc;

use alertflow_common::{Stage, StageState};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{info, warn};

use super::{AlertAnalysisCoordinator, TriggerContext, lock, validate_trigger};
use crate::dag::{ExecutionTimer, OneClickScheduler, RunSummary, StageOutcome, one_click_stages};
use crate::errors::OrchestratorError;

impl AlertAnalysisCoordinator {
    /// Run every analysis stage plus the configured orchestration stage in
    /// dependency order.
    ///
    /// Stages that already succeeded are satisfied and not re-run; stages
    /// already running are joined. A failed stage never aborts its siblings,
    /// but everything downstream of it is skipped with a reason naming it.
    pub async fn trigger_one_click(
        self: &Arc<Self>,
        alert_id: &str,
        context: TriggerContext,
    ) -> Result<RunSummary, OrchestratorError> {
        validate_trigger(alert_id, &context)?;

        let stages = one_click_stages(self.settings.orchestration.stage());
        let mut scheduler = OneClickScheduler::from_stages(stages.iter().copied())?;
        let mut summary = RunSummary::new(alert_id, stages.len());
        let timer = ExecutionTimer::start();

        {
            let entry = self.entry(alert_id);
            let guard = lock(&entry);
            for stage in &stages {
                let run = guard.record.run(*stage);
                if run.is_succeeded() {
                    scheduler.mark_satisfied(*stage);
                    summary.add_outcome(*stage, StageOutcome::satisfied(&run));
                }
            }
        }
        info!(
            alert_id,
            stages = stages.len(),
            satisfied = summary.satisfied,
            "one-click run started"
        );

        let mut in_flight = FuturesUnordered::new();
        loop {
            for stage in scheduler.ready_stages() {
                scheduler.mark_running(stage);
                match self.trigger_stage(alert_id, stage, context.clone()) {
                    Ok(handle) => in_flight.push(async move { (stage, handle.wait().await) }),
                    Err(e) => {
                        warn!(alert_id, %stage, error = %e, "one-click stage could not be started");
                        let skipped = scheduler.mark_failed(stage);
                        let mut run = self.current_run(alert_id, stage);
                        run.state = StageState::Failed;
                        run.error_summary = Some(e.to_string());
                        summary.add_outcome(stage, StageOutcome::from_run(&run));
                        self.skip_in_summary(alert_id, &skipped, &mut summary);
                    }
                }
            }

            let Some((stage, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(run) if run.is_succeeded() => {
                    scheduler.mark_succeeded(stage);
                    summary.add_outcome(stage, StageOutcome::from_run(&run));
                }
                Ok(run) => {
                    let skipped = scheduler.mark_failed(stage);
                    summary.add_outcome(stage, StageOutcome::from_run(&run));
                    self.skip_in_summary(alert_id, &skipped, &mut summary);
                }
                Err(e) => {
                    let skipped = scheduler.mark_failed(stage);
                    let mut run = self.current_run(alert_id, stage);
                    run.state = StageState::Failed;
                    run.error_summary = Some(e.to_string());
                    summary.add_outcome(stage, StageOutcome::from_run(&run));
                    self.skip_in_summary(alert_id, &skipped, &mut summary);
                }
            }
        }

        summary.finish(timer.elapsed(), |stage| self.manual_minutes(stage));
        info!(
            alert_id,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            minutes_saved = summary.estimated_minutes_saved,
            "one-click run finished"
        );
        if let Ok(payload) = serde_json::to_value(&summary) {
            self.timeline(alert_id, "ai_one_click_completed", payload);
        }
        Ok(summary)
    }

    fn current_run(&self, alert_id: &str, stage: Stage) -> alertflow_common::StageRun {
        self.existing(alert_id)
            .map(|entry| lock(&entry).record.run(stage))
            .unwrap_or_else(|| alertflow_common::StageRun::idle(alert_id, stage))
    }

    fn skip_in_summary(&self, alert_id: &str, skipped: &[(Stage, String)], summary: &mut RunSummary) {
        for (stage, run) in self.record_skipped(alert_id, skipped) {
            summary.add_outcome(stage, StageOutcome::from_run(&run));
        }
        // Stages still held by another claim are counted from the reason alone.
        for (stage, reason) in skipped {
            if !summary.stages.contains_key(stage) {
                let mut run = self.current_run(alert_id, *stage);
                run.state = StageState::Skipped;
                run.skip_reason = Some(reason.clone());
                summary.add_outcome(*stage, StageOutcome::from_run(&run));
            }
        }
    }
}
