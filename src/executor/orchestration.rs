use std::sync::Arc;
use std::time::Duration;

use alertflow_common::Stage;
use async_trait::async_trait;

use super::{StageContext, StageExecutor, StageOutput};
use crate::errors::{FailureKind, ProviderError};
use crate::ioc;
use crate::soar::{OrchestrationRequest, SoarClient};

/// SOAR orchestration over one transport. Both orchestration stages use
/// this executor with a different client.
pub struct OrchestrationExecutor {
    stage: Stage,
    client: Arc<dyn SoarClient>,
    max_iocs: usize,
}

impl OrchestrationExecutor {
    pub fn new(stage: Stage, client: Arc<dyn SoarClient>, max_iocs: usize) -> Self {
        Self {
            stage,
            client,
            max_iocs,
        }
    }

    pub fn request(&self, context: &StageContext) -> OrchestrationRequest {
        OrchestrationRequest {
            alert_id: context.alert_id.clone(),
            organization_id: context.organization_id.clone(),
            alert: context.alert.clone(),
            iocs: ioc::extract(&context.alert, self.max_iocs),
            playbook: context.upstream(Stage::PlaybookImmediate).cloned(),
            requested_by: context.requested_by.clone(),
        }
    }
}

#[async_trait]
impl StageExecutor for OrchestrationExecutor {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn invoke(
        &self,
        context: &StageContext,
        timeout: Duration,
    ) -> Result<StageOutput, ProviderError> {
        let request = self.request(context);
        let result = self.client.orchestrate(&request, timeout).await?;
        let data = serde_json::to_value(&result).map_err(|e| {
            ProviderError::terminal(FailureKind::InvalidResponse, e.to_string())
        })?;
        Ok(StageOutput {
            data,
            confidence: None,
            token_usage: None,
        })
    }
}
