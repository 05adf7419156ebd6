//! Per-alert analysis coordination.
//!
//! The coordinator owns every [`AlertAnalysisRecord`] and is the only writer
//! of stage runs and progress events. Triggers claim an `(alert, stage)`
//! pair with a leased [`ClaimToken`], hand the work to the [`StageRunner`]
//! on a background task, and fold the runner's transitions back into the
//! record. Results are matched to their claim by token; anything arriving
//! for a superseded or expired claim is discarded.
//!
//! Lock order is alert entry, then progress topic. No lock is held across
//! an await point.

mod claim;
mod handle;
mod one_click;
mod tentative;

pub use claim::ClaimToken;
pub use handle::StageRunHandle;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alertflow_common::{AlertAnalysisRecord, Stage, StageRun, StageState};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{AlertflowConfig, OrchestrationProtocol, StageSettings};
use crate::errors::{OrchestratorError, ProviderError};
use crate::executor::{ExecutionOutcome, ExecutionReport, StageContext, StageRunner, TransitionSink};
use crate::feedback::RunLookup;
use crate::progress::ProgressChannel;
use crate::timeline::QueuedTimeline;
use tentative::ClaimCommand;

/// Caller-supplied context for a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    pub organization_id: String,
    pub alert: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl TriggerContext {
    pub fn new(organization_id: impl Into<String>, alert: Value) -> Self {
        Self {
            organization_id: organization_id.into(),
            alert,
            requested_by: None,
        }
    }

    pub fn requested_by(mut self, who: impl Into<String>) -> Self {
        self.requested_by = Some(who.into());
        self
    }
}

/// Side-effect-free status snapshot.
///
/// `last_sequence` is the progress sequence the snapshot reflects; a client
/// resyncing after overflow subscribes from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub record: AlertAnalysisRecord,
    pub last_sequence: u64,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub claim_ttl: Duration,
    /// Orchestration transport used by one-click runs
    pub orchestration: OrchestrationProtocol,
    pub manual_minutes: BTreeMap<Stage, u32>,
}

impl CoordinatorSettings {
    pub fn from_config(config: &AlertflowConfig) -> Self {
        Self {
            claim_ttl: config.claim_ttl(),
            orchestration: config.toml.orchestration.protocol,
            manual_minutes: Stage::ALL
                .iter()
                .map(|s| (*s, config.stage_settings(*s).manual_minutes))
                .collect(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::from_secs(600),
            orchestration: OrchestrationProtocol::default(),
            manual_minutes: Stage::ALL
                .iter()
                .map(|s| (*s, StageSettings::defaults_for(*s).manual_minutes))
                .collect(),
        }
    }
}

pub(crate) struct ActiveClaim {
    pub token: ClaimToken,
    pub tx: watch::Sender<StageRun>,
    /// Cumulative attempt number of this claim's first attempt
    pub first_attempt: u32,
}

impl ActiveClaim {
    fn handle(&self, alert_id: &str, stage: Stage) -> StageRunHandle {
        StageRunHandle::new(alert_id, stage, self.token.id(), self.tx.subscribe())
    }

    fn attempt_number(&self, runner_attempt: u32) -> u32 {
        self.first_attempt + runner_attempt.max(1) - 1
    }
}

pub(crate) struct AlertEntry {
    pub record: AlertAnalysisRecord,
    pub claims: HashMap<Stage, ActiveClaim>,
}

impl AlertEntry {
    fn new(alert_id: &str) -> Self {
        Self {
            record: AlertAnalysisRecord::new(alert_id),
            claims: HashMap::new(),
        }
    }

    fn holds(&self, stage: Stage, claim: Uuid) -> bool {
        self.claims
            .get(&stage)
            .is_some_and(|active| active.token.owns(claim))
    }

    /// Results of succeeded stages, handed to downstream prompts.
    fn upstream_results(&self) -> BTreeMap<Stage, Value> {
        self.record
            .runs
            .iter()
            .filter(|(_, run)| run.is_succeeded())
            .filter_map(|(stage, run)| run.result.clone().map(|r| (*stage, r)))
            .collect()
    }
}

fn lock(entry: &Mutex<AlertEntry>) -> MutexGuard<'_, AlertEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The active claim for a stage if `claim` still holds it.
fn owned_claim(
    claims: &mut HashMap<Stage, ActiveClaim>,
    stage: Stage,
    claim: Uuid,
) -> Option<&mut ActiveClaim> {
    claims.get_mut(&stage).filter(|active| active.token.owns(claim))
}

fn validate_trigger(alert_id: &str, context: &TriggerContext) -> Result<(), OrchestratorError> {
    if alert_id.trim().is_empty() {
        return Err(OrchestratorError::validation("alert id must not be empty"));
    }
    if context.organization_id.trim().is_empty() {
        return Err(OrchestratorError::validation("organizationId must not be empty"));
    }
    if !context.alert.is_object() {
        return Err(OrchestratorError::validation("alert must be a JSON object"));
    }
    Ok(())
}

pub struct AlertAnalysisCoordinator {
    alerts: DashMap<String, Arc<Mutex<AlertEntry>>>,
    runner: Arc<StageRunner>,
    progress: Arc<ProgressChannel>,
    timeline: Option<QueuedTimeline>,
    settings: CoordinatorSettings,
}

impl AlertAnalysisCoordinator {
    pub fn new(
        runner: Arc<StageRunner>,
        progress: Arc<ProgressChannel>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            alerts: DashMap::new(),
            runner,
            progress,
            timeline: None,
            settings,
        }
    }

    pub fn with_timeline(mut self, timeline: QueuedTimeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn progress(&self) -> &Arc<ProgressChannel> {
        &self.progress
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn manual_minutes(&self, stage: Stage) -> u32 {
        self.settings
            .manual_minutes
            .get(&stage)
            .copied()
            .unwrap_or_else(|| StageSettings::defaults_for(stage).manual_minutes)
    }

    fn entry(&self, alert_id: &str) -> Arc<Mutex<AlertEntry>> {
        self.alerts
            .entry(alert_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AlertEntry::new(alert_id))))
            .clone()
    }

    fn existing(&self, alert_id: &str) -> Option<Arc<Mutex<AlertEntry>>> {
        self.alerts.get(alert_id).map(|e| Arc::clone(e.value()))
    }

    fn timeline(&self, alert_id: &str, event_type: &str, payload: Value) {
        if let Some(timeline) = &self.timeline {
            timeline.enqueue(alert_id, event_type, payload);
        }
    }

    /// Claim a stage and start it, or join the run already holding the claim.
    pub fn trigger_stage(
        self: &Arc<Self>,
        alert_id: &str,
        stage: Stage,
        context: TriggerContext,
    ) -> Result<StageRunHandle, OrchestratorError> {
        validate_trigger(alert_id, &context)?;

        let entry = self.entry(alert_id);
        let mut guard = lock(&entry);
        let now = Utc::now();

        if let Some(active) = guard.claims.get(&stage) {
            if !active.token.is_expired(now) {
                debug!(alert_id, %stage, "stage already running, returning existing handle");
                return Ok(active.handle(alert_id, stage));
            }
            warn!(
                alert_id,
                %stage,
                expired_at = %active.token.expires_at(),
                "claim expired, re-claiming stage"
            );
            guard.claims.remove(&stage);
        }

        let unmet: Vec<String> = stage
            .dependencies()
            .iter()
            .filter(|dep| guard.record.state(**dep) != StageState::Succeeded)
            .map(|dep| dep.to_string())
            .collect();
        if !unmet.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "{stage} requires {} to have succeeded",
                unmet.join(", ")
            )));
        }

        let stage_context = StageContext {
            alert_id: alert_id.to_string(),
            organization_id: context.organization_id,
            stage,
            alert: context.alert,
            upstream: guard.upstream_results(),
            requested_by: context.requested_by,
        };

        let token = ClaimToken::issue(self.settings.claim_ttl);
        let attempt = guard.record.run(stage).attempt + 1;
        let run = StageRun::running(alert_id, stage, attempt, token.id(), token.expires_at());
        let (tx, _) = watch::channel(run.clone());
        let claim = ActiveClaim {
            token,
            tx,
            first_attempt: attempt,
        };
        let handle = claim.handle(alert_id, stage);
        let compensation = ClaimCommand { run, claim }.apply(&mut guard);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                compensation.commit();
                self.progress.publish(
                    alert_id,
                    stage,
                    StageState::Running,
                    Some(json!({ "attempt": attempt })),
                );
                info!(alert_id, %stage, attempt, claim = %token.id(), "stage claimed");

                let this = Arc::clone(self);
                let span = info_span!("stage_run", alert_id, %stage, attempt);
                runtime.spawn(this.run_claim(stage_context, token.id()).instrument(span));
                Ok(handle)
            }
            Err(e) => {
                let restored = compensation.revert(&mut guard);
                warn!(alert_id, %stage, error = %e, "executor could not be launched, claim reverted");
                Err(OrchestratorError::Other(anyhow::anyhow!(
                    "cannot launch {stage} for alert {alert_id}: {e} (stage left {})",
                    restored.state
                )))
            }
        }
    }

    async fn run_claim(self: Arc<Self>, context: StageContext, claim: Uuid) {
        let sink = ClaimSink {
            coordinator: &self,
            alert_id: &context.alert_id,
            stage: context.stage,
            claim,
        };
        let report = self.runner.execute(&context, &sink).await;
        self.complete_claim(&context.alert_id, context.stage, claim, report);
    }

    /// Runner heartbeat at the start of each attempt.
    fn attempt_started(&self, alert_id: &str, stage: Stage, claim: Uuid, attempt: u32) -> bool {
        let Some(entry) = self.existing(alert_id) else {
            return false;
        };
        let mut guard = lock(&entry);
        let entry = &mut *guard;
        let Some(active) = owned_claim(&mut entry.claims, stage, claim) else {
            return false;
        };
        if active.token.is_expired(Utc::now()) {
            return false;
        }
        active.token.renew(self.settings.claim_ttl);

        let mut run = entry.record.run(stage);
        run.attempt = active.attempt_number(attempt);
        run.claim_expires_at = Some(active.token.expires_at());
        active.tx.send_replace(run.clone());
        entry.record.put(run);
        true
    }

    /// Renew once the runner holds a concurrency slot. An expired but
    /// still-owned claim is kept: nobody re-claimed it while it queued.
    fn admitted(&self, alert_id: &str, stage: Stage, claim: Uuid) -> bool {
        let Some(entry) = self.existing(alert_id) else {
            return false;
        };
        let mut guard = lock(&entry);
        let entry = &mut *guard;
        let Some(active) = owned_claim(&mut entry.claims, stage, claim) else {
            return false;
        };
        active.token.renew(self.settings.claim_ttl);

        let mut run = entry.record.run(stage);
        run.claim_expires_at = Some(active.token.expires_at());
        active.tx.send_replace(run.clone());
        entry.record.put(run);
        true
    }

    fn retrying(
        &self,
        alert_id: &str,
        stage: Stage,
        claim: Uuid,
        attempt: u32,
        error: &ProviderError,
        delay: Duration,
    ) {
        let Some(entry) = self.existing(alert_id) else {
            return;
        };
        let mut guard = lock(&entry);
        let entry = &mut *guard;
        let Some(active) = owned_claim(&mut entry.claims, stage, claim) else {
            return;
        };
        active.token.renew(self.settings.claim_ttl);

        let mut run = entry.record.run(stage);
        run.raw_error = Some(error.to_string());
        run.claim_expires_at = Some(active.token.expires_at());
        let failed_attempt = active.attempt_number(attempt);
        active.tx.send_replace(run.clone());
        entry.record.put(run);

        self.progress.publish(
            alert_id,
            stage,
            StageState::Running,
            Some(json!({
                "attempt": failed_attempt,
                "retrying": true,
                "retryInMs": delay.as_millis() as u64,
                "error": error.to_string(),
            })),
        );
    }

    /// Fold the runner's final report into the record.
    fn complete_claim(&self, alert_id: &str, stage: Stage, claim: Uuid, report: ExecutionReport) {
        let Some(entry) = self.existing(alert_id) else {
            info!(alert_id, %stage, %claim, "alert removed, discarding result");
            return;
        };
        let mut guard = lock(&entry);
        if !guard.holds(stage, claim) {
            warn!(alert_id, %stage, %claim, "result for superseded claim discarded");
            return;
        }
        let Some(active) = guard.claims.remove(&stage) else {
            return;
        };

        let now = Utc::now();
        let mut run = guard.record.run(stage);
        run.attempt = active.attempt_number(report.attempts);
        run.finished_at = Some(now);
        run.claim_expires_at = None;
        run.latency_ms = Some(report.latency_ms);

        let (event_type, payload) = if active.token.is_expired(now) {
            let expired = OrchestratorError::ClaimExpired {
                alert_id: alert_id.to_string(),
                stage,
            };
            warn!(alert_id, %stage, error = %expired, "discarding late result");
            run.state = StageState::Failed;
            run.result = None;
            run.error_summary = Some(format!("{stage} failed: claim expired before result arrived"));
            run.raw_error = Some(expired.to_string());
            ("ai_stage_failed", json!({ "attempt": run.attempt, "error": run.error_summary }))
        } else {
            match report.outcome {
                ExecutionOutcome::Succeeded(output) => {
                    run.state = StageState::Succeeded;
                    run.result = Some(output.data);
                    run.confidence = output.confidence;
                    run.token_usage = output.token_usage;
                    run.output_ref = Some(claim.to_string());
                    run.error_summary = None;
                    run.raw_error = None;
                    info!(
                        alert_id,
                        %stage,
                        attempt = run.attempt,
                        confidence = ?run.confidence,
                        latency_ms = report.latency_ms,
                        "stage succeeded"
                    );
                    (
                        "ai_stage_succeeded",
                        json!({
                            "attempt": run.attempt,
                            "confidence": run.confidence,
                            "latencyMs": report.latency_ms,
                            "outputRef": run.output_ref,
                        }),
                    )
                }
                ExecutionOutcome::Failed { error, summary } => {
                    run.state = StageState::Failed;
                    run.result = None;
                    run.confidence = None;
                    run.output_ref = None;
                    run.error_summary = Some(summary);
                    run.raw_error = Some(error.to_string());
                    warn!(alert_id, %stage, attempt = run.attempt, error = %error, "stage failed");
                    (
                        "ai_stage_failed",
                        json!({
                            "attempt": run.attempt,
                            "error": run.error_summary,
                            "kind": error.kind(),
                        }),
                    )
                }
            }
        };

        guard.record.put(run.clone());
        active.tx.send_replace(run.clone());
        self.progress
            .publish(alert_id, stage, run.state, Some(payload.clone()));
        drop(guard);

        let mut entry_payload = payload;
        entry_payload["stage"] = json!(stage);
        self.timeline(alert_id, event_type, entry_payload);
    }

    /// Snapshot of every stage's latest run.
    pub fn get_status(&self, alert_id: &str) -> Result<StatusSnapshot, OrchestratorError> {
        let entry = self
            .existing(alert_id)
            .ok_or_else(|| OrchestratorError::AlertNotFound {
                alert_id: alert_id.to_string(),
            })?;
        let guard = lock(&entry);
        Ok(StatusSnapshot {
            record: guard.record.clone(),
            last_sequence: self.progress.latest_sequence(alert_id),
        })
    }

    /// Mark succeeded stages stale. Returns the stages that changed.
    pub fn mark_stale(
        &self,
        alert_id: &str,
        stage: Option<Stage>,
    ) -> Result<Vec<Stage>, OrchestratorError> {
        let entry = self
            .existing(alert_id)
            .ok_or_else(|| OrchestratorError::AlertNotFound {
                alert_id: alert_id.to_string(),
            })?;
        let mut guard = lock(&entry);

        let candidates: Vec<Stage> = match stage {
            Some(stage) => vec![stage],
            None => Stage::ALL.to_vec(),
        };
        let mut changed = Vec::new();
        for stage in candidates {
            let mut run = guard.record.run(stage);
            if !run.is_succeeded() {
                continue;
            }
            run.state = StageState::Stale;
            guard.record.put(run);
            self.progress.publish(alert_id, stage, StageState::Stale, None);
            changed.push(stage);
        }
        drop(guard);

        if !changed.is_empty() {
            info!(alert_id, stages = ?changed, "stage results marked stale");
            self.timeline(alert_id, "ai_analysis_stale", json!({ "stages": changed }));
        }
        Ok(changed)
    }

    /// Forget an alert: in-flight claims are abandoned and its progress
    /// topic is dropped. Late results are discarded.
    pub fn abort(&self, alert_id: &str) -> Result<(), OrchestratorError> {
        let (_, entry) = self
            .alerts
            .remove(alert_id)
            .ok_or_else(|| OrchestratorError::AlertNotFound {
                alert_id: alert_id.to_string(),
            })?;
        let abandoned: Vec<Stage> = {
            let mut guard = lock(&entry);
            guard.claims.drain().map(|(stage, _)| stage).collect()
        };
        self.progress.remove(alert_id);
        info!(alert_id, abandoned = ?abandoned, "alert analysis aborted");
        Ok(())
    }

    /// Write `skipped` runs for stages a one-click walk will not attempt.
    /// Stages currently held by a claim are left to their run.
    fn record_skipped(&self, alert_id: &str, skipped: &[(Stage, String)]) -> Vec<(Stage, StageRun)> {
        if skipped.is_empty() {
            return Vec::new();
        }
        let entry = self.entry(alert_id);
        let mut guard = lock(&entry);
        let now = Utc::now();
        let mut written = Vec::new();

        for (stage, reason) in skipped {
            if guard.claims.contains_key(stage) {
                continue;
            }
            let previous = guard.record.run(*stage);
            let run = StageRun {
                attempt: previous.attempt,
                state: StageState::Skipped,
                finished_at: Some(now),
                skip_reason: Some(reason.clone()),
                ..StageRun::idle(alert_id, *stage)
            };
            guard.record.put(run.clone());
            self.progress.publish(
                alert_id,
                *stage,
                StageState::Skipped,
                Some(json!({ "reason": reason })),
            );
            debug!(alert_id, stage = %stage, reason = %reason, "stage skipped");
            written.push((*stage, run));
        }
        drop(guard);

        for (stage, run) in &written {
            self.timeline(
                alert_id,
                "ai_stage_skipped",
                json!({ "stage": stage, "reason": run.skip_reason }),
            );
        }
        written
    }
}

impl RunLookup for AlertAnalysisCoordinator {
    fn stage_run(&self, alert_id: &str, stage: Stage) -> Option<StageRun> {
        let entry = self.existing(alert_id)?;
        let guard = lock(&entry);
        guard.record.runs.get(&stage).cloned()
    }
}

/// Routes runner transitions for one claim back to the coordinator.
struct ClaimSink<'a> {
    coordinator: &'a AlertAnalysisCoordinator,
    alert_id: &'a str,
    stage: Stage,
    claim: Uuid,
}

impl TransitionSink for ClaimSink<'_> {
    fn attempt_started(&self, attempt: u32) -> bool {
        self.coordinator
            .attempt_started(self.alert_id, self.stage, self.claim, attempt)
    }

    fn admitted(&self, _attempt: u32) -> bool {
        self.coordinator
            .admitted(self.alert_id, self.stage, self.claim)
    }

    fn retrying(&self, attempt: u32, error: &ProviderError, delay: Duration) {
        self.coordinator
            .retrying(self.alert_id, self.stage, self.claim, attempt, error, delay);
    }
}
