use alertflow_common::{Stage, TokenUsage};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{AiProvider, ProviderRequest, ProviderResponse};
use crate::errors::{FailureKind, ProviderError};

/// Canned, deterministic answers keyed on stage and prompt keywords.
///
/// Used by `alertflow run` without a configured backend and by tests.
#[derive(Debug, Default, Clone)]
pub struct OfflineProvider;

struct Profile {
    category: &'static str,
    severity: &'static str,
    technique: (&'static str, &'static str, &'static str),
    containment: &'static str,
}

const PROFILES: &[(&[&str], Profile)] = &[
    (
        &["ransomware", "encrypt"],
        Profile {
            category: "malware_infection",
            severity: "critical",
            technique: ("T1486", "Data Encrypted for Impact", "impact"),
            containment: "Isolate affected hosts from the network",
        },
    ),
    (
        &["phish", "email"],
        Profile {
            category: "phishing",
            severity: "high",
            technique: ("T1566", "Phishing", "initial-access"),
            containment: "Quarantine the message and block the sender domain",
        },
    ),
    (
        &["brute", "failed login", "password"],
        Profile {
            category: "unauthorized_access",
            severity: "medium",
            technique: ("T1110", "Brute Force", "credential-access"),
            containment: "Lock the targeted accounts and block the source IP",
        },
    ),
    (
        &["exfil", "upload", "transfer"],
        Profile {
            category: "data_exfiltration",
            severity: "high",
            technique: ("T1041", "Exfiltration Over C2 Channel", "exfiltration"),
            containment: "Block outbound traffic to the destination",
        },
    ),
];

const FALLBACK: Profile = Profile {
    category: "suspicious_activity",
    severity: "medium",
    technique: ("T1059", "Command and Scripting Interpreter", "execution"),
    containment: "Increase monitoring on the affected host",
};

impl OfflineProvider {
    pub fn new() -> Self {
        Self
    }

    /// The alert block of a prompt, so task wording never drives the answer.
    fn alert_section(prompt: &str) -> &str {
        let Some(start) = prompt.find("## Alert") else {
            return prompt;
        };
        let rest = &prompt[start..];
        match rest[2..].find("\n## ") {
            Some(end) => &rest[..end + 2],
            None => rest,
        }
    }

    fn profile(prompt: &str) -> &'static Profile {
        let lower = Self::alert_section(prompt).to_lowercase();
        PROFILES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, profile)| profile)
            .unwrap_or(&FALLBACK)
    }

    fn answer(stage: Stage, profile: &Profile) -> Option<Value> {
        let (technique_id, technique_name, tactic) = profile.technique;
        let answer = match stage {
            Stage::Classification => json!({
                "category": profile.category,
                "severity": profile.severity,
                "is_false_positive": false,
                "confidence": 0.82,
                "summary": format!("Alert classified as {} ({})", profile.category, profile.severity),
            }),
            Stage::DeepAnalysis => json!({
                "summary": format!("Activity consistent with {}", profile.category),
                "attack_vector": tactic,
                "risk_score": 7.5,
                "confidence": 0.76,
                "recommendations": [profile.containment, "Collect volatile evidence before remediation"],
            }),
            Stage::MitreMapping => json!({
                "techniques": [{"id": technique_id, "name": technique_name, "tactic": tactic}],
                "confidence": 0.7,
            }),
            Stage::PlaybookImmediate => json!({
                "playbook": "immediate_containment",
                "actions": [profile.containment, "Notify the on-call incident handler"],
                "confidence": 0.8,
            }),
            Stage::PlaybookInvestigation => json!({
                "playbook": "investigation",
                "steps": [
                    "Review authentication logs for the affected accounts",
                    format!("Hunt for related {} activity across the fleet", technique_id),
                    "Document findings in the case record",
                ],
                "confidence": 0.74,
            }),
            Stage::OrchestrationApi | Stage::OrchestrationMcp => return None,
        };
        Some(answer)
    }
}

#[async_trait]
impl AiProvider for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let profile = Self::profile(&request.prompt);
        let answer = Self::answer(request.stage, profile).ok_or_else(|| {
            ProviderError::terminal(
                FailureKind::Unsupported,
                format!("offline provider has no answer for {}", request.stage),
            )
        })?;
        let text = answer.to_string();
        Ok(ProviderResponse {
            token_usage: Some(TokenUsage {
                prompt_tokens: (request.prompt.len() / 4) as u64,
                completion_tokens: (text.len() / 4) as u64,
            }),
            text,
        })
    }
}
