use std::time::Duration;

use async_trait::async_trait;

use super::{OrchestrationAction, OrchestrationRequest, OrchestrationResult, SoarClient};
use crate::config::OrchestrationProtocol;
use crate::errors::ProviderError;
use crate::ioc::IocKind;

/// Simulated SOAR platform: plans one containment action per IOC.
pub struct OfflineSoarClient {
    protocol: OrchestrationProtocol,
}

impl OfflineSoarClient {
    pub fn new(protocol: OrchestrationProtocol) -> Self {
        Self { protocol }
    }
}

#[async_trait]
impl SoarClient for OfflineSoarClient {
    fn protocol(&self) -> OrchestrationProtocol {
        self.protocol
    }

    async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
        _timeout: Duration,
    ) -> Result<OrchestrationResult, ProviderError> {
        let actions: Vec<OrchestrationAction> = request
            .iocs
            .iter()
            .map(|ioc| {
                let action = match ioc.kind {
                    IocKind::Ip => "block_ip",
                    IocKind::Domain => "sinkhole_domain",
                    IocKind::Url => "block_url",
                    IocKind::Md5 | IocKind::Sha1 | IocKind::Sha256 => "quarantine_hash",
                };
                OrchestrationAction {
                    action: action.to_string(),
                    target: Some(ioc.value.clone()),
                    status: Some("simulated".to_string()),
                }
            })
            .collect();

        let summary = format!(
            "Simulated {} orchestration for alert {}: {} action(s){}",
            self.protocol,
            request.alert_id,
            actions.len(),
            if request.playbook.is_some() {
                ", immediate playbook attached"
            } else {
                ""
            }
        );

        Ok(OrchestrationResult {
            status: "completed".to_string(),
            playbook_id: Some(format!("offline-{}-{}", self.protocol, request.alert_id)),
            actions,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioc::Ioc;
    use serde_json::json;

    #[tokio::test]
    async fn test_one_action_per_ioc() {
        let client = OfflineSoarClient::new(OrchestrationProtocol::Api);
        let request = OrchestrationRequest {
            alert_id: "A1".into(),
            organization_id: "org".into(),
            alert: json!({}),
            iocs: vec![
                Ioc {
                    value: "1.2.3.4".into(),
                    kind: IocKind::Ip,
                },
                Ioc {
                    value: "evil.ru".into(),
                    kind: IocKind::Domain,
                },
            ],
            playbook: None,
            requested_by: None,
        };
        let result = client
            .orchestrate(&request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.status, "completed");
        assert_eq!(result.actions.len(), 2);
        assert_eq!(result.actions[0].action, "block_ip");
        assert_eq!(result.playbook_id.as_deref(), Some("offline-api-A1"));
    }
}
