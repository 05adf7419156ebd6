use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{OrchestrationRequest, OrchestrationResult, SoarClient};
use crate::config::OrchestrationProtocol;
use crate::errors::{FailureKind, ProviderError};

const TOOL_NAME: &str = "orchestrate_response";
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// SOAR tool server spoken to over JSON-RPC 2.0 `tools/call`.
pub struct McpSoarClient {
    client: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<ToolResult>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl McpSoarClient {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("alertflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for SOAR mcp")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    fn envelope(&self, request: &OrchestrationRequest) -> Result<Value, ProviderError> {
        let arguments = serde_json::to_value(request).map_err(|e| {
            ProviderError::terminal(FailureKind::InvalidInput, format!("unserializable request: {e}"))
        })?;
        Ok(json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "tools/call",
            "params": {"name": TOOL_NAME, "arguments": arguments},
        }))
    }

    fn interpret(reply: RpcReply) -> Result<OrchestrationResult, ProviderError> {
        if let Some(err) = reply.error {
            let message = format!("JSON-RPC error {}: {}", err.code, err.message);
            return Err(match err.code {
                METHOD_NOT_FOUND => ProviderError::terminal(FailureKind::Unsupported, message),
                INVALID_PARAMS => ProviderError::terminal(FailureKind::InvalidInput, message),
                _ => ProviderError::transient(FailureKind::Network, message),
            });
        }

        let result = reply.result.ok_or_else(|| {
            ProviderError::terminal(FailureKind::InvalidResponse, "reply carries neither result nor error")
        })?;

        let text = result
            .content
            .iter()
            .find(|item| item.kind == "text")
            .and_then(|item| item.text.as_deref())
            .ok_or_else(|| {
                ProviderError::terminal(FailureKind::InvalidResponse, "tool result has no text content")
            })?;

        if result.is_error {
            return Err(ProviderError::terminal(FailureKind::InvalidInput, text.to_string()));
        }

        serde_json::from_str(text).map_err(|e| {
            ProviderError::terminal(
                FailureKind::InvalidResponse,
                format!("tool text is not an orchestration result: {e}"),
            )
        })
    }
}

#[async_trait]
impl SoarClient for McpSoarClient {
    fn protocol(&self) -> OrchestrationProtocol {
        OrchestrationProtocol::Mcp
    }

    async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
        timeout: Duration,
    ) -> Result<OrchestrationResult, ProviderError> {
        let body = self.envelope(request)?;
        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        let reply: RpcReply = resp.json().await.map_err(|e| {
            ProviderError::terminal(FailureKind::InvalidResponse, format!("malformed JSON-RPC reply: {e}"))
        })?;
        Self::interpret(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: Value) -> Result<OrchestrationResult, ProviderError> {
        McpSoarClient::interpret(serde_json::from_value(raw).unwrap())
    }

    #[test]
    fn test_text_content_is_decoded() {
        let result = parse(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "{\"status\":\"completed\",\"actions\":[{\"action\":\"block_ip\",\"target\":\"1.2.3.4\"}],\"summary\":\"ok\"}"}]}
        }))
        .unwrap();
        assert_eq!(result.status, "completed");
        assert_eq!(result.actions[0].target.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_method_not_found_is_terminal() {
        let err = parse(json!({"error": {"code": -32601, "message": "no such method"}})).unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.kind(), FailureKind::Unsupported);
    }

    #[test]
    fn test_server_error_is_transient() {
        let err = parse(json!({"error": {"code": -32000, "message": "busy"}})).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_tool_error_flag_is_terminal() {
        let err = parse(json!({
            "result": {"content": [{"type": "text", "text": "unknown alert"}], "isError": true}
        }))
        .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.message(), "unknown alert");
    }

    #[test]
    fn test_envelope_shape() {
        let client = McpSoarClient::new("http://soar.local/mcp").unwrap();
        let request = OrchestrationRequest {
            alert_id: "A1".into(),
            organization_id: "org".into(),
            alert: json!({}),
            iocs: Vec::new(),
            playbook: None,
            requested_by: None,
        };
        let first = client.envelope(&request).unwrap();
        let second = client.envelope(&request).unwrap();
        assert_eq!(first["method"], "tools/call");
        assert_eq!(first["params"]["name"], TOOL_NAME);
        assert_eq!(first["params"]["arguments"]["alert_id"], "A1");
        assert_ne!(first["id"], second["id"]);
    }
}
