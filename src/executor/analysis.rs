use std::sync::Arc;
use std::time::Duration;

use alertflow_common::Stage;
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{StageContext, StageExecutor, StageOutput, prompts};
use crate::errors::ProviderError;
use crate::provider::{AiProvider, ModelParameters, ProviderRequest};

/// Model-backed executor for the five analysis stages.
pub struct AnalysisExecutor {
    stage: Stage,
    provider: Arc<dyn AiProvider>,
    params: ModelParameters,
}

impl AnalysisExecutor {
    pub fn new(stage: Stage, provider: Arc<dyn AiProvider>, params: ModelParameters) -> Self {
        Self {
            stage,
            provider,
            params,
        }
    }
}

/// Parse a model answer into a JSON object.
///
/// Accepts a bare object or one embedded in prose/code fences; anything
/// else is wrapped as `{"text": ...}`.
pub fn parse_answer(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
        && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&trimmed[start..=end])
    {
        return value;
    }
    json!({ "text": trimmed })
}

#[async_trait]
impl StageExecutor for AnalysisExecutor {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn invoke(
        &self,
        context: &StageContext,
        timeout: Duration,
    ) -> Result<StageOutput, ProviderError> {
        let request = ProviderRequest {
            stage: self.stage,
            prompt: prompts::build(context),
            timeout,
            params: self.params.clone(),
        };
        let response = self.provider.invoke(&request).await?;
        let data = parse_answer(&response.text);
        Ok(StageOutput {
            confidence: data.get("confidence").and_then(Value::as_f64),
            data,
            token_usage: response.token_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OfflineProvider;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_bare_object() {
        let value = parse_answer(r#"{"category": "phishing"}"#);
        assert_eq!(value["category"], "phishing");
    }

    #[test]
    fn test_parse_fenced_object() {
        let value = parse_answer("Here you go:\n```json\n{\"severity\": \"high\"}\n```");
        assert_eq!(value["severity"], "high");
    }

    #[test]
    fn test_non_json_is_wrapped() {
        let value = parse_answer("  The alert looks benign.  ");
        assert_eq!(value, json!({"text": "The alert looks benign."}));
    }

    #[test]
    fn test_json_array_is_wrapped() {
        let value = parse_answer("[1, 2]");
        assert_eq!(value["text"], "[1, 2]");
    }

    #[tokio::test]
    async fn test_invoke_with_offline_provider() {
        let executor = AnalysisExecutor::new(
            Stage::Classification,
            Arc::new(OfflineProvider::new()),
            ModelParameters::default(),
        );
        let context = StageContext {
            alert_id: "A1".into(),
            organization_id: "org".into(),
            stage: Stage::Classification,
            alert: json!({"title": "Brute force against VPN"}),
            upstream: BTreeMap::new(),
            requested_by: None,
        };
        let output = executor
            .invoke(&context, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.data["category"], "unauthorized_access");
        assert_eq!(output.confidence, Some(0.82));
        assert!(output.token_usage.is_some());
    }
}
