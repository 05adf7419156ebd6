//! AI inference backends.
//!
//! The engine treats the model as a black box: one prompt in, one text
//! answer out. [`HttpProvider`] talks to a remote execution service and
//! [`OfflineProvider`] returns deterministic canned answers.

mod http;
mod offline;

pub use http::{HttpProvider, InvokeBody, InvokeReply};
pub use offline::OfflineProvider;

use std::sync::Arc;
use std::time::Duration;

use alertflow_common::{Stage, TokenUsage};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderKind, ProviderSection};
use crate::errors::ProviderError;

/// Sampling parameters forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl ModelParameters {
    pub fn from_section(section: &ProviderSection) -> Self {
        Self {
            model: section.model.clone(),
            temperature: section.temperature,
            top_p: section.top_p,
            max_tokens: section.max_tokens,
        }
    }
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self::from_section(&ProviderSection::default())
    }
}

/// One model invocation.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub stage: Stage,
    pub prompt: String,
    /// Budget the backend should enforce on its side
    pub timeout: Duration,
    pub params: ModelParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub token_usage: Option<TokenUsage>,
}

impl ProviderResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_usage: None,
        }
    }
}

/// A remote model that answers prompts.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Build the provider selected by `[provider]`.
pub fn from_config(section: &ProviderSection) -> Result<Arc<dyn AiProvider>> {
    match section.kind {
        ProviderKind::Offline => Ok(Arc::new(OfflineProvider::new())),
        ProviderKind::Http => {
            let Some(base_url) = section.base_url.as_deref() else {
                bail!("provider.kind is \"http\" but provider.base_url is not set");
            };
            Ok(Arc::new(HttpProvider::new(base_url)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_base_url_for_http() {
        let section = ProviderSection {
            kind: ProviderKind::Http,
            ..ProviderSection::default()
        };
        assert!(from_config(&section).is_err());
    }

    #[test]
    fn test_from_config_offline() {
        let provider = from_config(&ProviderSection::default()).unwrap();
        assert_eq!(provider.name(), "offline");
    }
}
