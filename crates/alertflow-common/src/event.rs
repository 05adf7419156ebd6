use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::StageState;
use crate::stage::Stage;

/// A stage state transition as streamed to observers.
///
/// `sequence` is assigned by the progress channel at publish time and is
/// strictly increasing per alert; observers use it as the de-duplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub alert_id: String,
    pub stage: Stage,
    pub state: StageState,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub emitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = ProgressEvent {
            alert_id: "A1".to_string(),
            stage: Stage::DeepAnalysis,
            state: StageState::Running,
            sequence: 7,
            payload: Some(serde_json::json!({"attempt": 1})),
            emitted_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["alertId"], "A1");
        assert_eq!(json["stage"], "deep_analysis");
        assert_eq!(json["state"], "running");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["payload"]["attempt"], 1);
    }
}
