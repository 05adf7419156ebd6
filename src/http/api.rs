use std::sync::Arc;

use alertflow_common::{FeedbackRecord, Stage};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};

use crate::coordinator::TriggerContext;
use crate::engine::Engine;
use crate::errors::OrchestratorError;
use crate::feedback::FeedbackSubmission;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub engine: Engine,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct StaleRequest {
    #[serde(default)]
    pub stage: Option<Stage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleResponse {
    pub alert_id: String,
    pub stale_stages: Vec<Stage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackView {
    pub latest: Option<FeedbackRecord>,
    pub history: Vec<FeedbackRecord>,
    pub export_eligible: bool,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::Validation(_) => ApiError::BadRequest(message),
            OrchestratorError::AlertNotFound { .. } => ApiError::NotFound(message),
            OrchestratorError::ClaimExpired { .. }
            | OrchestratorError::BacklogOverflow { .. } => ApiError::Conflict(message),
            OrchestratorError::Other(e) => {
                tracing::error!(error = %e, "request failed");
                ApiError::Internal(message)
            }
        }
    }
}

fn parse_stage(raw: &str) -> Result<Stage, ApiError> {
    raw.parse().map_err(|e: alertflow_common::UnknownStage| ApiError::BadRequest(e.to_string()))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/alerts/{alert_id}/stages/{stage}", post(trigger_stage))
        .route("/api/alerts/{alert_id}/one-click", post(trigger_one_click))
        .route("/api/alerts/{alert_id}/status", get(get_status))
        .route("/api/alerts/{alert_id}/stale", post(mark_stale))
        .route("/api/alerts/{alert_id}", delete(abort_alert))
        .route("/api/alerts/{alert_id}/feedback", post(submit_feedback))
        .route(
            "/api/alerts/{alert_id}/stages/{stage}/feedback",
            get(get_feedback),
        )
        .route("/api/export/candidates", get(export_candidates))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn trigger_stage(
    State(state): State<SharedState>,
    Path((alert_id, stage)): Path<(String, String)>,
    Json(context): Json<TriggerContext>,
) -> Result<impl IntoResponse, ApiError> {
    let stage = parse_stage(&stage)?;
    let handle = state
        .engine
        .coordinator
        .trigger_stage(&alert_id, stage, context)?;
    Ok((StatusCode::ACCEPTED, Json(handle.current())))
}

async fn trigger_one_click(
    State(state): State<SharedState>,
    Path(alert_id): Path<String>,
    Json(context): Json<TriggerContext>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .engine
        .coordinator
        .trigger_one_click(&alert_id, context)
        .await?;
    Ok(Json(summary))
}

async fn get_status(
    State(state): State<SharedState>,
    Path(alert_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.coordinator.get_status(&alert_id)?))
}

async fn mark_stale(
    State(state): State<SharedState>,
    Path(alert_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: StaleRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StaleRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid stale request: {e}")))?
    };
    let stale_stages = state
        .engine
        .coordinator
        .mark_stale(&alert_id, request.stage)?;
    Ok(Json(StaleResponse {
        alert_id,
        stale_stages,
    }))
}

async fn abort_alert(
    State(state): State<SharedState>,
    Path(alert_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.coordinator.abort(&alert_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_feedback(
    State(state): State<SharedState>,
    Path(alert_id): Path<String>,
    Json(submission): Json<FeedbackSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.engine.ledger.submit(&alert_id, submission)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_feedback(
    State(state): State<SharedState>,
    Path((alert_id, stage)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let stage = parse_stage(&stage)?;
    let ledger = &state.engine.ledger;
    Ok(Json(FeedbackView {
        latest: ledger.latest(&alert_id, stage),
        history: ledger.history(&alert_id, stage),
        export_eligible: ledger.is_export_eligible(&alert_id, stage),
    }))
}

async fn export_candidates(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.engine.ledger.export_candidates())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (OrchestratorError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                OrchestratorError::AlertNotFound {
                    alert_id: "A1".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                OrchestratorError::BacklogOverflow {
                    alert_id: "A1".into(),
                    requested: 3,
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::Other(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_parse_stage_rejects_unknown() {
        assert!(parse_stage("deep-analysis").is_ok());
        assert!(matches!(parse_stage("triage"), Err(ApiError::BadRequest(_))));
    }
}
