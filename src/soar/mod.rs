//! SOAR backends reached over two wire protocols.
//!
//! Both protocols are normalised to one [`OrchestrationResult`] so the
//! orchestration executor does not care which transport produced it.

mod api;
mod mcp;
mod offline;

pub use api::ApiSoarClient;
pub use mcp::McpSoarClient;
pub use offline::OfflineSoarClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{OrchestrationProtocol, OrchestrationSection};
use crate::errors::ProviderError;
use crate::ioc::Ioc;

/// What the engine asks the SOAR platform to act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub alert_id: String,
    pub organization_id: String,
    pub alert: Value,
    pub iocs: Vec<Ioc>,
    /// Immediate-response playbook, when one has been generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationAction {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Normalised SOAR answer, identical for both protocols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_id: Option<String>,
    #[serde(default)]
    pub actions: Vec<OrchestrationAction>,
    #[serde(default)]
    pub summary: String,
}

#[async_trait]
pub trait SoarClient: Send + Sync {
    fn protocol(&self) -> OrchestrationProtocol;

    async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
        timeout: Duration,
    ) -> Result<OrchestrationResult, ProviderError>;
}

/// Build the client for one protocol. Without an endpoint the offline
/// client answers instead.
pub fn client_for(
    section: &OrchestrationSection,
    protocol: OrchestrationProtocol,
) -> anyhow::Result<Arc<dyn SoarClient>> {
    let Some(endpoint) = section.endpoint.as_deref() else {
        return Ok(Arc::new(OfflineSoarClient::new(protocol)));
    };
    Ok(match protocol {
        OrchestrationProtocol::Api => Arc::new(ApiSoarClient::new(endpoint)?),
        OrchestrationProtocol::Mcp => Arc::new(McpSoarClient::new(endpoint)?),
    })
}
