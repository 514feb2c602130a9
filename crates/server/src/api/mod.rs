use crate::config::{AppState, ServerConfig};
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use conductor_core::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config);
    let engine = state.engine.clone();

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

/// Create the API router
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/templates", get(handlers::list_templates))
        .route("/api/runs", get(handlers::list_runs).post(handlers::create_run))
        .route("/api/runs/{run_id}", get(handlers::get_run))
        .route("/api/runs/{run_id}/events", get(handlers::get_run_events))
        .route("/api/runs/{run_id}/cancel", post(handlers::cancel_run))
        .route("/api/metrics", get(handlers::get_metrics))
        .route("/api/alerts", get(handlers::get_alerts))
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "conductor",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Error type for API handlers. Engine lookups that miss map to 404 and
/// rejected definitions to 400; everything else is a 500.
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: anyhow::anyhow!(message.into()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(message.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_msg = self.error.to_string();
        let details = self
            .error
            .chain()
            .skip(1)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");

        let response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };

        (self.status, Json(response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        let status = match error.downcast_ref::<EngineError>() {
            Some(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Some(EngineError::InvalidDefinition(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let mut config = ServerConfig::default();
        config.engine.retry_backoff_ms = 0;
        create_router(AppState::new(&config))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_templates() {
        let (status, body) = send(&app(), get("/api/templates")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["templates"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_run_template_and_query_it() {
        let app = app();
        let (status, created) = send(
            &app,
            post_json(
                "/api/runs",
                json!({
                    "template_id": "health_check",
                    "variables": { "username": "octocat" },
                    "wait": true
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "completed");

        let run_id = created["run_id"].as_str().unwrap().to_string();
        let (status, report) = send(&app, get(&format!("/api/runs/{}", run_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["total_steps"], 6);
        assert_eq!(report["progress"], 1.0);

        let (_, events) = send(&app, get(&format!("/api/runs/{}/events", run_id))).await;
        assert!(!events["events"].as_array().unwrap().is_empty());

        let (_, listed) = send(&app, get("/api/runs?status=completed")).await;
        assert_eq!(listed["runs"].as_array().unwrap().len(), 1);

        let (_, metrics) = send(&app, get("/api/metrics")).await;
        assert!(!metrics["counters"].as_array().unwrap().is_empty());

        let (status, alerts) = send(&app, get("/api/alerts")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(alerts["alerts"].as_array().unwrap().is_empty());
        assert_eq!(alerts["health"]["overall"], "healthy");
        assert_eq!(alerts["health"]["tools"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_inline_workflow() {
        let (status, created) = send(
            &app(),
            post_json(
                "/api/runs",
                json!({
                    "workflow": {
                        "id": "adhoc",
                        "name": "Ad hoc",
                        "steps": [
                            { "id": "list", "capability": "mcp__supabase__", "action": "list_projects" }
                        ]
                    },
                    "wait": true
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "completed");
    }

    #[tokio::test]
    async fn test_not_found_and_bad_requests() {
        let app = app();

        let (status, _) = send(&app, get("/api/runs/00000000-0000-0000-0000-000000000000")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get("/api/runs/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, get("/api/runs?status=sleeping")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            post_json("/api/runs", json!({ "template_id": "no_such_template" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, post_json("/api/runs", json!({ "variables": {} }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let (status, body) = send(
            &app(),
            post_json("/api/runs/00000000-0000-0000-0000-000000000000/cancel", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], false);
    }
}
