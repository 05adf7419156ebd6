use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One discrete AI/orchestration operation applied to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classification,
    DeepAnalysis,
    MitreMapping,
    PlaybookImmediate,
    PlaybookInvestigation,
    OrchestrationApi,
    OrchestrationMcp,
}

#[derive(Debug, Clone, Error)]
#[error("Unknown stage '{0}'. Valid values: classification, deep_analysis, mitre_mapping, playbook_immediate, playbook_investigation, orchestration_api, orchestration_mcp")]
pub struct UnknownStage(pub String);

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Classification,
        Stage::DeepAnalysis,
        Stage::MitreMapping,
        Stage::PlaybookImmediate,
        Stage::PlaybookInvestigation,
        Stage::OrchestrationApi,
        Stage::OrchestrationMcp,
    ];

    /// The analysis stages, i.e. everything except the two orchestration transports.
    pub const ANALYSIS: [Stage; 5] = [
        Stage::Classification,
        Stage::DeepAnalysis,
        Stage::MitreMapping,
        Stage::PlaybookImmediate,
        Stage::PlaybookInvestigation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classification => "classification",
            Stage::DeepAnalysis => "deep_analysis",
            Stage::MitreMapping => "mitre_mapping",
            Stage::PlaybookImmediate => "playbook_immediate",
            Stage::PlaybookInvestigation => "playbook_investigation",
            Stage::OrchestrationApi => "orchestration_api",
            Stage::OrchestrationMcp => "orchestration_mcp",
        }
    }

    /// Stages that must have succeeded before this one may run.
    pub fn dependencies(&self) -> &'static [Stage] {
        match self {
            Stage::MitreMapping | Stage::PlaybookInvestigation => &[Stage::DeepAnalysis],
            Stage::PlaybookImmediate => &[Stage::Classification],
            Stage::Classification
            | Stage::DeepAnalysis
            | Stage::OrchestrationApi
            | Stage::OrchestrationMcp => &[],
        }
    }

    pub fn is_orchestration(&self) -> bool {
        matches!(self, Stage::OrchestrationApi | Stage::OrchestrationMcp)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_dashes_and_case() {
        assert_eq!("deep-analysis".parse::<Stage>().unwrap(), Stage::DeepAnalysis);
        assert_eq!("MITRE_MAPPING".parse::<Stage>().unwrap(), Stage::MitreMapping);
        assert!("triage".parse::<Stage>().is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
        }
    }

    #[test]
    fn test_roots_have_no_dependencies() {
        assert!(Stage::Classification.dependencies().is_empty());
        assert!(Stage::DeepAnalysis.dependencies().is_empty());
        assert_eq!(Stage::MitreMapping.dependencies(), &[Stage::DeepAnalysis]);
        assert_eq!(Stage::PlaybookImmediate.dependencies(), &[Stage::Classification]);
    }
}
