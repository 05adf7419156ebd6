//! Integration tests for alertflow
//!
//! These tests drive the engine through its public API, the CLI binary and
//! the HTTP router.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use alertflow::config::AlertflowConfig;
use alertflow::coordinator::TriggerContext;
use alertflow::engine::Engine;
use alertflow::errors::{FailureKind, OrchestratorError, ProviderError};
use alertflow::executor::{ExecutorRegistry, StageContext, StageExecutor, StageOutput};
use alertflow::feedback::FeedbackSubmission;
use alertflow_common::{Stage, StageState, Verdict};
use async_trait::async_trait;
use serde_json::{Value, json};

// =============================================================================
// Helpers
// =============================================================================

/// Executor that replays a script of results, then succeeds.
struct Scripted {
    stage: Stage,
    script: std::sync::Mutex<VecDeque<Result<Value, ProviderError>>>,
    calls: AtomicU32,
    delay: Duration,
}

impl Scripted {
    fn ok(stage: Stage) -> Arc<Self> {
        Self::with(stage, Vec::new(), Duration::ZERO)
    }

    fn with(stage: Stage, script: Vec<Result<Value, ProviderError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            stage,
            script: std::sync::Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            delay,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageExecutor for Scripted {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn invoke(
        &self,
        _context: &StageContext,
        _timeout: Duration,
    ) -> Result<StageOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let data = match next {
            Some(result) => result?,
            None => json!({"stage": self.stage.as_str(), "confidence": 0.82}),
        };
        Ok(StageOutput {
            data,
            confidence: None,
            token_usage: None,
        })
    }
}

fn transient() -> Result<Value, ProviderError> {
    Err(ProviderError::transient(FailureKind::Overloaded, "rate limited"))
}

fn test_config() -> AlertflowConfig {
    let mut config = AlertflowConfig::defaults();
    config.toml.retry.base_delay_ms = 0;
    config.toml.retry.max_delay_ms = 0;
    config.toml.retry.jitter_ratio = 0.0;
    config
}

fn engine_with(executors: Vec<Arc<Scripted>>) -> Engine {
    let mut registry = ExecutorRegistry::new();
    for stage in Stage::ALL {
        match executors.iter().find(|e| e.stage == stage) {
            Some(executor) => registry.register(executor.clone()),
            None => registry.register(Scripted::ok(stage)),
        }
    }
    Engine::with_registry(&test_config(), registry, None)
}

fn context() -> TriggerContext {
    TriggerContext::new(
        "org-1",
        json!({"title": "Brute force against VPN", "src_ip": "198.51.100.7"}),
    )
}

// =============================================================================
// Coordinator
// =============================================================================

mod coordinator {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_trigger_joins_running_run() {
        let slow = Scripted::with(Stage::Classification, Vec::new(), Duration::from_millis(50));
        let engine = engine_with(vec![slow.clone()]);

        let first = engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap();
        let second = engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap();
        assert_eq!(first.claim_token(), second.claim_token());

        let a = first.wait().await.unwrap();
        let b = second.wait().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(slow.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_twice_then_success_records_third_attempt() {
        let flaky = Scripted::with(
            Stage::Classification,
            vec![transient(), transient()],
            Duration::ZERO,
        );
        let engine = engine_with(vec![flaky.clone()]);

        let run = engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(run.state, StageState::Succeeded);
        assert_eq!(run.attempt, 3);
        assert!(run.error_summary.is_none());
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_deep_analysis_failure_skips_only_its_dependents() {
        let failing = Scripted::with(
            Stage::DeepAnalysis,
            vec![Err(ProviderError::terminal(
                FailureKind::InvalidInput,
                "prompt rejected",
            ))],
            Duration::ZERO,
        );
        let engine = engine_with(vec![failing]);

        let summary = engine
            .coordinator
            .trigger_one_click("A1", context())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);

        let status = engine.coordinator.get_status("A1").unwrap();
        let deep = status.record.run(Stage::DeepAnalysis);
        assert_eq!(deep.state, StageState::Failed);
        assert!(deep.error_summary.is_some());
        assert!(deep.raw_error.is_some());
        for stage in [Stage::MitreMapping, Stage::PlaybookInvestigation] {
            let run = status.record.run(stage);
            assert_eq!(run.state, StageState::Skipped);
            assert!(run.skip_reason.unwrap().contains("deep_analysis"));
        }
        for stage in [Stage::Classification, Stage::PlaybookImmediate] {
            assert_eq!(status.record.state(stage), StageState::Succeeded);
        }
    }

    #[tokio::test]
    async fn test_one_click_after_classification() {
        let engine = Engine::from_config(&test_config()).unwrap();

        let classification = engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(classification.confidence, Some(82.0));

        let summary = engine
            .coordinator
            .trigger_one_click("A1", context())
            .await
            .unwrap();
        assert_eq!(summary.satisfied, 1);
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 0);
        assert!(summary.stages[&Stage::Classification].satisfied);
        assert!(summary.stages.contains_key(&Stage::OrchestrationApi));
    }

    #[tokio::test]
    async fn test_alerts_are_isolated() {
        let failing = Scripted::with(
            Stage::Classification,
            vec![Err(ProviderError::terminal(FailureKind::Authentication, "bad key"))],
            Duration::ZERO,
        );
        let engine = engine_with(vec![failing]);

        let failed = engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap()
            .wait()
            .await
            .unwrap();
        let ok = engine
            .coordinator
            .trigger_stage("A2", Stage::Classification, context())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(failed.state, StageState::Failed);
        assert_eq!(ok.state, StageState::Succeeded);
    }
}

// =============================================================================
// Progress
// =============================================================================

mod progress {
    use super::*;

    #[tokio::test]
    async fn test_full_replay_has_gap_free_sequences() {
        let engine = engine_with(Vec::new());
        engine
            .coordinator
            .trigger_one_click("A1", context())
            .await
            .unwrap();

        let latest = engine.progress.latest_sequence("A1");
        let mut subscription = engine.progress.subscribe("A1", Some(0)).unwrap();
        let mut sequences = Vec::new();
        while sequences.len() < latest as usize {
            let event = subscription.next().await.unwrap().unwrap();
            sequences.push(event.sequence);
        }
        let expected: Vec<u64> = (1..=latest).collect();
        assert_eq!(sequences, expected);
    }

    #[tokio::test]
    async fn test_status_carries_resync_point() {
        let engine = engine_with(Vec::new());
        engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap()
            .wait()
            .await
            .unwrap();

        let status = engine.coordinator.get_status("A1").unwrap();
        assert_eq!(status.last_sequence, engine.progress.latest_sequence("A1"));
        assert!(engine.progress.subscribe("A1", Some(status.last_sequence)).is_ok());
    }
}

// =============================================================================
// Feedback
// =============================================================================

mod feedback {
    use super::*;

    fn submission(output_ref: &str, verdict: Verdict) -> FeedbackSubmission {
        FeedbackSubmission {
            stage: Stage::Classification,
            output_ref: output_ref.to_string(),
            verdict,
            reviewer_id: "analyst-1".to_string(),
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn test_feedback_without_succeeded_run_is_rejected() {
        let engine = engine_with(Vec::new());
        let result = engine
            .ledger
            .submit("A1", submission("missing", Verdict::Correct));
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_repeat_feedback_appends_and_latest_wins() {
        let engine = engine_with(Vec::new());
        let run = engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap()
            .wait()
            .await
            .unwrap();
        let output_ref = run.output_ref.unwrap();

        engine
            .ledger
            .submit("A1", submission(&output_ref, Verdict::Correct))
            .unwrap();
        let second = engine
            .ledger
            .submit("A1", submission(&output_ref, Verdict::Incorrect))
            .unwrap();

        assert_eq!(engine.ledger.history("A1", Stage::Classification).len(), 2);
        let latest = engine.ledger.latest("A1", Stage::Classification).unwrap();
        assert_eq!(latest.verdict, Verdict::Incorrect);
        assert_eq!(latest.verified_confidence, second.verified_confidence);
        assert!(!engine.ledger.is_export_eligible("A1", Stage::Classification));
    }

    async fn classify(engine: &Engine) -> String {
        engine
            .coordinator
            .trigger_stage("A1", Stage::Classification, context())
            .unwrap()
            .wait()
            .await
            .unwrap()
            .output_ref
            .unwrap()
    }

    #[tokio::test]
    async fn test_rerun_after_feedback_leaves_new_output_unreviewed() {
        let engine = engine_with(Vec::new());
        let reviewed = classify(&engine).await;
        engine
            .ledger
            .submit("A1", submission(&reviewed, Verdict::Correct))
            .unwrap();
        assert!(engine.ledger.is_export_eligible("A1", Stage::Classification));

        let rerun = classify(&engine).await;
        assert_ne!(rerun, reviewed);
        assert!(!engine.ledger.is_export_eligible("A1", Stage::Classification));
        assert!(engine.ledger.export_candidates().is_empty());
    }
}

// =============================================================================
// CLI
// =============================================================================

mod cli {
    use assert_cmd::Command;
    use assert_cmd::cargo::cargo_bin_cmd;
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn alertflow(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("alertflow");
        cmd.current_dir(dir.path())
            .env_remove("ALERTFLOW_CONFIG")
            .env("NO_COLOR", "1");
        cmd
    }

    fn write_alert(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("alert.json");
        std::fs::write(
            &path,
            r#"{"id": "A1", "title": "Brute force against VPN", "src_ip": "198.51.100.7"}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_help_and_version() {
        let dir = TempDir::new().unwrap();
        alertflow(&dir).arg("--help").assert().success();
        alertflow(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();
        alertflow(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));
        assert!(dir.path().join("alertflow.toml").exists());

        alertflow(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("alertflow.toml"),
            "[engine]\nmax_concurrency_per_org = 0\n",
        )
        .unwrap();
        alertflow(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_concurrency_per_org"));
    }

    #[test]
    fn test_run_single_stage_json() {
        let dir = TempDir::new().unwrap();
        let alert = write_alert(&dir);
        alertflow(&dir)
            .arg("run")
            .arg(&alert)
            .args(["--stage", "classification", "--ui", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"state\":\"succeeded\""))
            .stdout(predicate::str::contains("unauthorized_access"));
    }

    #[test]
    fn test_run_one_click_minimal() {
        let dir = TempDir::new().unwrap();
        let alert = write_alert(&dir);
        alertflow(&dir)
            .arg("run")
            .arg(&alert)
            .args(["--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ok   mitre_mapping"))
            .stdout(predicate::str::contains("6 succeeded"));
    }

    #[test]
    fn test_run_unknown_stage_fails() {
        let dir = TempDir::new().unwrap();
        let alert = write_alert(&dir);
        alertflow(&dir)
            .arg("run")
            .arg(&alert)
            .args(["--stage", "triage"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("triage"));
    }
}

// =============================================================================
// HTTP
// =============================================================================

mod http {
    use super::*;
    use alertflow::http::{AppState, build_router};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_one_click_over_http() {
        let app = build_router(Arc::new(AppState {
            engine: engine_with(Vec::new()),
        }));
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/alerts/A1/one-click")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"organizationId": "org-1", "alert": {"title": "x"}}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let summary: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary["succeeded"], 6);
        assert_eq!(summary["alertId"], "A1");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/alerts/A1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["overallStatus"], "complete");
    }
}
