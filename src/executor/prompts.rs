//! Prompt templates for the analysis stages.
//!
//! Each prompt carries the alert as JSON, any upstream stage results the
//! stage builds on, and an instruction to answer with a single JSON object
//! that includes a `confidence` field.

use alertflow_common::Stage;
use serde_json::Value;

use super::StageContext;

const ROLE: &str = "You are a Security Operations Center analyst. Treat every alert as a \
real threat until the evidence says otherwise, and stay objective and fact-based.";

const ANSWER_FORMAT: &str = "Respond with one JSON object only, no prose. Include a \
\"confidence\" field between 0 and 1.";

fn task(stage: Stage) -> &'static str {
    match stage {
        Stage::Classification => {
            "Classify the security event. Provide \"category\" (one of malware_infection, \
             data_exfiltration, unauthorized_access, phishing, suspicious_activity, \
             false_positive), \"severity\" (critical, high, medium, low), \
             \"is_false_positive\" and a one-sentence \"summary\"."
        }
        Stage::DeepAnalysis => {
            "Perform a deep analysis of the alert. Provide \"summary\", \"attack_vector\", \
             \"affected_assets\", a \"risk_score\" from 0 to 10 and \"recommendations\"."
        }
        Stage::MitreMapping => {
            "Map the activity described by the alert and the analysis to MITRE ATT&CK. \
             Provide \"techniques\" as a list of objects with \"id\", \"name\" and \"tactic\"."
        }
        Stage::PlaybookImmediate => {
            "Write the immediate containment playbook for this alert. Provide \"playbook\" \
             and an ordered list of \"actions\" an analyst can take in the next hour."
        }
        Stage::PlaybookInvestigation => {
            "Write the investigation playbook for this alert. Provide \"playbook\" and an \
             ordered list of \"steps\" covering evidence collection, scoping and root cause."
        }
        Stage::OrchestrationApi | Stage::OrchestrationMcp => {
            "Plan automated response actions for this alert."
        }
    }
}

/// Upstream results a stage's prompt should include.
fn inputs(stage: Stage) -> &'static [Stage] {
    match stage {
        Stage::Classification | Stage::DeepAnalysis => &[],
        Stage::MitreMapping | Stage::PlaybookInvestigation => &[Stage::DeepAnalysis],
        Stage::PlaybookImmediate => &[Stage::Classification, Stage::DeepAnalysis],
        Stage::OrchestrationApi | Stage::OrchestrationMcp => &[Stage::PlaybookImmediate],
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn build(context: &StageContext) -> String {
    let mut prompt = format!(
        "{ROLE}\n\n## Task\n{}\n\n## Alert {}\n```json\n{}\n```\n",
        task(context.stage),
        context.alert_id,
        pretty(&context.alert)
    );

    for upstream in inputs(context.stage) {
        if let Some(result) = context.upstream(*upstream) {
            prompt.push_str(&format!(
                "\n## Prior {} result\n```json\n{}\n```\n",
                upstream,
                pretty(result)
            ));
        }
    }

    prompt.push_str("\n## Answer format\n");
    prompt.push_str(ANSWER_FORMAT);
    prompt.push('\n');
    prompt
}
