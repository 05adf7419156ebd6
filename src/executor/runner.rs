use std::sync::Arc;
use std::time::{Duration, Instant};

use alertflow_common::Stage;
use tracing::{debug, warn};

use super::{
    ConcurrencyPool, ExecutionOutcome, ExecutionReport, ExecutorRegistry, RetryPolicy,
    StageContext, StageOutput, TransitionSink, normalize_confidence,
};
use crate::errors::{FailureKind, ProviderError};

/// Runs a stage's executor under timeout, retry and admission control.
pub struct StageRunner {
    registry: Arc<ExecutorRegistry>,
    pool: Arc<ConcurrencyPool>,
    retry: RetryPolicy,
    timeouts: Box<dyn Fn(Stage) -> Duration + Send + Sync>,
}

impl StageRunner {
    pub fn new<F>(
        registry: Arc<ExecutorRegistry>,
        pool: Arc<ConcurrencyPool>,
        retry: RetryPolicy,
        timeouts: F,
    ) -> Self
    where
        F: Fn(Stage) -> Duration + Send + Sync + 'static,
    {
        Self {
            registry,
            pool,
            retry,
            timeouts: Box::new(timeouts),
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &ConcurrencyPool {
        &self.pool
    }

    pub fn timeout_for(&self, stage: Stage) -> Duration {
        (self.timeouts)(stage)
    }

    /// Execute until success, a terminal failure or exhausted retries.
    pub async fn execute(&self, context: &StageContext, sink: &dyn TransitionSink) -> ExecutionReport {
        let stage = context.stage;
        let Some(executor) = self.registry.get(stage) else {
            return Self::failed(
                stage,
                ProviderError::terminal(
                    FailureKind::Unsupported,
                    format!("no executor registered for {stage}"),
                ),
                0,
                0,
            );
        };
        let timeout = self.timeout_for(stage);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if !sink.attempt_started(attempt) {
                return Self::failed(
                    stage,
                    ProviderError::terminal(FailureKind::Cancelled, "claim no longer held"),
                    attempt,
                    0,
                );
            }

            let Some(permit) = self.pool.acquire(&context.organization_id).await else {
                return Self::failed(
                    stage,
                    ProviderError::terminal(FailureKind::Cancelled, "concurrency pool closed"),
                    attempt,
                    0,
                );
            };
            if !sink.admitted(attempt) {
                return Self::failed(
                    stage,
                    ProviderError::terminal(FailureKind::Cancelled, "claim lost while queued"),
                    attempt,
                    0,
                );
            }
            debug!(alert_id = %context.alert_id, %stage, attempt, "invoking backend");

            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, executor.invoke(context, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(timeout)),
            };
            let latency_ms = started.elapsed().as_millis() as u64;
            drop(permit);

            match result {
                Ok(output) => {
                    return ExecutionReport {
                        outcome: ExecutionOutcome::Succeeded(Self::normalize(output)),
                        attempts: attempt,
                        latency_ms,
                    };
                }
                Err(error) if error.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        alert_id = %context.alert_id,
                        %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, retrying"
                    );
                    sink.retrying(attempt, &error, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Self::failed(stage, error, attempt, latency_ms),
            }
        }
    }

    fn normalize(mut output: StageOutput) -> StageOutput {
        output.confidence = output
            .confidence
            .or_else(|| output.data.get("confidence").and_then(|v| v.as_f64()))
            .and_then(normalize_confidence);
        output
    }

    fn failed(stage: Stage, error: ProviderError, attempts: u32, latency_ms: u64) -> ExecutionReport {
        let summary = if error.is_transient() {
            format!(
                "{stage} failed after {attempts} attempt(s): {} ({})",
                error.message(),
                error.kind()
            )
        } else {
            format!("{stage} failed: {} ({})", error.message(), error.kind())
        };
        ExecutionReport {
            outcome: ExecutionOutcome::Failed { error, summary },
            attempts,
            latency_ms,
        }
    }
}
