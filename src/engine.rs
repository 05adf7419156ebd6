//! Wiring of the engine's components from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{AlertflowConfig, OrchestrationProtocol};
use crate::coordinator::{AlertAnalysisCoordinator, CoordinatorSettings};
use crate::executor::{ConcurrencyPool, ExecutorRegistry, StageRunner};
use crate::feedback::FeedbackLedger;
use crate::progress::ProgressChannel;
use crate::provider::{self, ModelParameters};
use crate::soar;
use crate::timeline::{self, QueuedTimeline};

/// Everything a front end (HTTP server or CLI) needs.
#[derive(Clone)]
pub struct Engine {
    pub coordinator: Arc<AlertAnalysisCoordinator>,
    pub ledger: Arc<FeedbackLedger>,
    pub progress: Arc<ProgressChannel>,
}

impl Engine {
    /// Build the standard executors from configuration.
    ///
    /// Must run inside a tokio runtime: the timeline worker is spawned here.
    pub fn from_config(config: &AlertflowConfig) -> Result<Self> {
        let toml = &config.toml;
        let provider =
            provider::from_config(&toml.provider).context("Failed to set up AI provider")?;
        let soar_api = soar::client_for(&toml.orchestration, OrchestrationProtocol::Api)
            .context("Failed to set up SOAR api client")?;
        let soar_mcp = soar::client_for(&toml.orchestration, OrchestrationProtocol::Mcp)
            .context("Failed to set up SOAR mcp client")?;
        let registry = ExecutorRegistry::standard(
            provider.clone(),
            ModelParameters::from_section(&toml.provider),
            soar_api,
            soar_mcp,
            toml.orchestration.max_iocs,
        );

        let appender = timeline::from_config(&toml.timeline).context("Failed to set up timeline")?;
        let timeline = QueuedTimeline::start(appender, config.timeline_timeout());

        info!(
            provider = provider.name(),
            orchestration = %toml.orchestration.protocol,
            max_concurrency_per_org = toml.engine.max_concurrency_per_org,
            "engine configured"
        );
        Ok(Self::with_registry(config, registry, Some(timeline)))
    }

    /// Build around an explicit executor table.
    pub fn with_registry(
        config: &AlertflowConfig,
        registry: ExecutorRegistry,
        timeline: Option<QueuedTimeline>,
    ) -> Self {
        let stage_config = config.clone();
        let runner = StageRunner::new(
            Arc::new(registry),
            Arc::new(ConcurrencyPool::new(config.toml.engine.max_concurrency_per_org)),
            config.retry_policy(),
            move |stage| stage_config.stage_settings(stage).timeout,
        );
        let progress = Arc::new(ProgressChannel::new(config.toml.engine.backlog_capacity));

        let mut coordinator = AlertAnalysisCoordinator::new(
            Arc::new(runner),
            progress.clone(),
            CoordinatorSettings::from_config(config),
        );
        if let Some(timeline) = timeline {
            coordinator = coordinator.with_timeline(timeline);
        }
        let coordinator = Arc::new(coordinator);
        let ledger = Arc::new(FeedbackLedger::new(coordinator.clone()));

        Self {
            coordinator,
            ledger,
            progress,
        }
    }
}
