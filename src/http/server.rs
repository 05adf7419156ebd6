use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::info;

use super::api::{self, AppState};
use super::ws;
use crate::config::AlertflowConfig;
use crate::engine::Engine;

/// Build the full application router: REST API plus the progress socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws/alerts/{alert_id}", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and block until Ctrl+C.
pub async fn serve(config: AlertflowConfig) -> Result<()> {
    let engine = Engine::from_config(&config)?;
    let app = build_router(Arc::new(AppState { engine }));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("Alertflow engine listening on http://{}", local_addr);
    info!(addr = %local_addr, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let engine = Engine::from_config(&AlertflowConfig::defaults()).unwrap();
        build_router(Arc::new(AppState { engine }))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn trigger_body() -> Value {
        json!({"organizationId": "org-1", "alert": {"title": "Brute force against VPN"}})
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_router();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_alert_status_is_not_found() {
        let app = test_router();
        let (status, body) = send(&app, "GET", "/api/alerts/nope/status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_unknown_stage_is_bad_request() {
        let app = test_router();
        let (status, _) = send(
            &app,
            "POST",
            "/api/alerts/A1/stages/triage",
            Some(trigger_body()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_dependency_is_bad_request() {
        let app = test_router();
        let (status, body) = send(
            &app,
            "POST",
            "/api/alerts/A1/stages/mitre_mapping",
            Some(trigger_body()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("deep_analysis"));
    }

    #[tokio::test]
    async fn test_trigger_is_accepted_and_feedback_round_trips() {
        let app = test_router();
        let (status, body) = send(
            &app,
            "POST",
            "/api/alerts/A1/stages/classification",
            Some(trigger_body()),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["stage"], "classification");

        let output_ref = loop {
            let (_, status) = send(&app, "GET", "/api/alerts/A1/status", None).await;
            let run = &status["runs"]["classification"];
            if run["state"] == "succeeded" {
                assert!(status["lastSequence"].as_u64().unwrap() >= 2);
                break run["outputRef"].as_str().unwrap().to_string();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };

        let (status, record) = send(
            &app,
            "POST",
            "/api/alerts/A1/feedback",
            Some(json!({
                "stage": "classification",
                "outputRef": output_ref,
                "verdict": "correct",
                "reviewerId": "analyst-1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record["verifiedConfidence"], 91.0);

        let (status, view) = send(
            &app,
            "GET",
            "/api/alerts/A1/stages/classification/feedback",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["exportEligible"], true);
        assert_eq!(view["history"].as_array().unwrap().len(), 1);

        let (_, candidates) = send(&app, "GET", "/api/export/candidates", None).await;
        assert_eq!(candidates.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_accepts_empty_body_and_abort_removes_alert() {
        let app = test_router();
        let (status, _) = send(&app, "POST", "/api/alerts/A1/one-click", Some(trigger_body())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "POST", "/api/alerts/A1/stale", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["staleStages"].as_array().unwrap().len(), 6);

        let (status, _) = send(&app, "DELETE", "/api/alerts/A1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", "/api/alerts/A1/status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
