use std::time::Duration;

use alertflow_common::TokenUsage;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AiProvider, ProviderRequest, ProviderResponse};
use crate::errors::{FailureKind, ProviderError, truncate};

/// Exit code the execution service reports when its own timeout fired.
const REMOTE_TIMEOUT_EXIT: i32 = 124;

/// Request body accepted by the execution service.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeBody {
    pub input: String,
    pub timeout: u64,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

/// Reply from the execution service.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeReply {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub returncode: i32,
    #[serde(default)]
    pub usage: Option<UsageReply>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageReply {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Remote execution service reached over HTTP.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("alertflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for AI provider")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn interpret(reply: InvokeReply) -> Result<ProviderResponse, ProviderError> {
        if !reply.success {
            let detail = if reply.stderr.is_empty() {
                format!("exit code {}", reply.returncode)
            } else {
                format!("exit code {}: {}", reply.returncode, truncate(&reply.stderr, 300))
            };
            return Err(if reply.returncode == REMOTE_TIMEOUT_EXIT {
                ProviderError::transient(FailureKind::Timeout, detail)
            } else {
                ProviderError::terminal(FailureKind::InvalidInput, detail)
            });
        }
        if reply.stdout.trim().is_empty() {
            return Err(ProviderError::terminal(
                FailureKind::InvalidResponse,
                "provider returned an empty answer",
            ));
        }
        Ok(ProviderResponse {
            text: reply.stdout,
            token_usage: reply.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

#[async_trait]
impl AiProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = InvokeBody {
            input: request.prompt.clone(),
            timeout: request.timeout.as_secs().max(1),
            model: request.params.model.clone(),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
        };

        let resp = self
            .client
            .post(format!("{}/", self.base_url))
            .timeout(request.timeout + Duration::from_secs(5))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        let reply: InvokeReply = resp.json().await.map_err(|e| {
            ProviderError::terminal(FailureKind::InvalidResponse, format!("malformed reply: {e}"))
        })?;
        Self::interpret(reply)
    }
}
