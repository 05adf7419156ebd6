use std::collections::HashMap;
use std::sync::Arc;

use alertflow_common::Stage;

use super::{AnalysisExecutor, OrchestrationExecutor, StageExecutor};
use crate::provider::{AiProvider, ModelParameters};
use crate::soar::SoarClient;

/// `Stage -> StageExecutor` table, resolved once at startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analysis executors for every analysis stage plus one orchestration
    /// executor per SOAR transport.
    pub fn standard(
        provider: Arc<dyn AiProvider>,
        params: ModelParameters,
        soar_api: Arc<dyn SoarClient>,
        soar_mcp: Arc<dyn SoarClient>,
        max_iocs: usize,
    ) -> Self {
        let mut registry = Self::new();
        for stage in Stage::ANALYSIS {
            registry.register(Arc::new(AnalysisExecutor::new(
                stage,
                provider.clone(),
                params.clone(),
            )));
        }
        registry.register(Arc::new(OrchestrationExecutor::new(
            Stage::OrchestrationApi,
            soar_api,
            max_iocs,
        )));
        registry.register(Arc::new(OrchestrationExecutor::new(
            Stage::OrchestrationMcp,
            soar_mcp,
            max_iocs,
        )));
        registry
    }

    /// Register an executor under its own stage, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(executor.stage(), executor);
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.executors.contains_key(&stage)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestrationProtocol;
    use crate::provider::OfflineProvider;
    use crate::soar::OfflineSoarClient;

    #[test]
    fn test_standard_registry_covers_every_stage() {
        let registry = ExecutorRegistry::standard(
            Arc::new(OfflineProvider::new()),
            ModelParameters::default(),
            Arc::new(OfflineSoarClient::new(OrchestrationProtocol::Api)),
            Arc::new(OfflineSoarClient::new(OrchestrationProtocol::Mcp)),
            10,
        );
        assert_eq!(registry.len(), Stage::ALL.len());
        for stage in Stage::ALL {
            assert!(registry.contains(stage), "missing {stage}");
            assert_eq!(registry.get(stage).unwrap().stage(), stage);
        }
    }
}
