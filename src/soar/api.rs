use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::{OrchestrationRequest, OrchestrationResult, SoarClient};
use crate::config::OrchestrationProtocol;
use crate::errors::{FailureKind, ProviderError};

/// Plain request/response SOAR REST endpoint.
pub struct ApiSoarClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ApiSoarClient {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("alertflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for SOAR api")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SoarClient for ApiSoarClient {
    fn protocol(&self) -> OrchestrationProtocol {
        OrchestrationProtocol::Api
    }

    async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
        timeout: Duration,
    ) -> Result<OrchestrationResult, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/orchestrations", self.endpoint))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        resp.json::<OrchestrationResult>().await.map_err(|e| {
            ProviderError::terminal(
                FailureKind::InvalidResponse,
                format!("malformed orchestration result: {e}"),
            )
        })
    }
}
