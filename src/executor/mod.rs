//! Stage execution against external backends.
//!
//! A [`StageExecutor`] performs exactly one backend call for one stage.
//! [`StageRunner`] wraps any executor with the per-stage timeout, the
//! retry/backoff policy, per-organization admission and result
//! normalisation, and reports every transition through a
//! [`TransitionSink`]. The runner never writes run state itself.

pub mod analysis;
pub mod orchestration;
pub mod pool;
pub mod prompts;
pub mod registry;
pub mod retry;
pub mod runner;

pub use analysis::AnalysisExecutor;
pub use orchestration::OrchestrationExecutor;
pub use pool::ConcurrencyPool;
pub use registry::ExecutorRegistry;
pub use retry::RetryPolicy;
pub use runner::StageRunner;

use std::collections::BTreeMap;
use std::time::Duration;

use alertflow_common::{Stage, TokenUsage};
use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ProviderError;

/// Everything an executor may read for one call.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub alert_id: String,
    pub organization_id: String,
    pub stage: Stage,
    pub alert: Value,
    /// Results of stages that had succeeded when the run was claimed
    pub upstream: BTreeMap<Stage, Value>,
    pub requested_by: Option<String>,
}

impl StageContext {
    pub fn upstream(&self, stage: Stage) -> Option<&Value> {
        self.upstream.get(&stage)
    }
}

/// Successful result of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub data: Value,
    /// As reported by the backend; normalised by the runner
    pub confidence: Option<f64>,
    pub token_usage: Option<TokenUsage>,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn invoke(
        &self,
        context: &StageContext,
        timeout: Duration,
    ) -> Result<StageOutput, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded(StageOutput),
    Failed {
        error: ProviderError,
        /// Human-readable summary for the failed run
        summary: String,
    },
}

/// Final report of a runner invocation, across all attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    /// Attempts made by this invocation (1-based)
    pub attempts: u32,
    /// Wall-clock time of the last attempt's backend call
    pub latency_ms: u64,
}

/// Receives executor transitions. Implemented by the coordinator, which
/// is the only writer of run state.
pub trait TransitionSink: Send + Sync {
    /// An attempt is about to call the backend. Returning `false` abandons
    /// the invocation (the claim is no longer held).
    fn attempt_started(&self, attempt: u32) -> bool;

    /// The attempt now holds a concurrency slot. Time spent queued behind
    /// the organization cap must not count against the claim, so sinks
    /// renew here. Returning `false` abandons the invocation.
    fn admitted(&self, _attempt: u32) -> bool {
        true
    }

    /// A transient failure will be retried after `delay`.
    fn retrying(&self, attempt: u32, error: &ProviderError, delay: Duration);
}

/// Sink that ignores transitions; used where nothing observes them.
pub struct NoopSink;

impl TransitionSink for NoopSink {
    fn attempt_started(&self, _attempt: u32) -> bool {
        true
    }

    fn retrying(&self, _attempt: u32, _error: &ProviderError, _delay: Duration) {}
}

/// Bring a backend-reported confidence to the 0-100 scale.
///
/// Fractions in `0.0..=1.0` are scaled by 100; the result is clamped and
/// rounded to one decimal.
pub fn normalize_confidence(raw: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let scaled = if raw <= 1.0 { raw * 100.0 } else { raw };
    Some((scaled.min(100.0) * 10.0).round() / 10.0)
}
