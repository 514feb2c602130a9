use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use conductor_core::{
    events::Event,
    metrics::{Alert, HealthReport, MetricsSnapshot},
    ExecutionMode, RunId, RunStatus, RunStatusReport, RunSummary, TemplateSummary,
    WorkflowDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

fn parse_run_id(run_id: &str) -> ApiResult<RunId> {
    run_id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid run ID '{}'", run_id)))
}

/// List the workflow templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> Json<ListTemplatesResponse> {
    Json(ListTemplatesResponse {
        templates: state.engine.templates(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListTemplatesResponse {
    pub templates: Vec<TemplateSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<String>,
}

/// List runs, newest first
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<ListRunsResponse>> {
    let status = query
        .status
        .map(|s| s.parse::<RunStatus>())
        .transpose()
        .map_err(ApiError::bad_request)?;

    let runs = state.engine.list_runs(status).await?;
    Ok(Json(ListRunsResponse { runs }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunSummary>,
}

/// Start a run from a template or an inline workflow
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<(StatusCode, Json<CreateRunResponse>)> {
    let mut definition = match (req.template_id, req.workflow) {
        (Some(template_id), None) => state.engine.definition(&template_id)?,
        (None, Some(workflow)) => workflow,
        _ => {
            return Err(ApiError::bad_request(
                "Exactly one of template_id or workflow is required",
            ))
        }
    };
    if let Some(mode) = req.mode {
        definition.mode = mode;
    }

    if req.wait {
        let run = state.engine.execute(&definition, req.variables).await?;
        tracing::info!("Workflow run finished: run_id={}, status={}", run.id, run.status);

        return Ok((
            StatusCode::OK,
            Json(CreateRunResponse {
                run_id: run.id,
                status: run.status,
                report: Some(run.status_report()),
            }),
        ));
    }

    let handle = state.engine.start(&definition, req.variables).await?;
    tracing::info!("Started workflow execution: run_id={}", handle.run_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRunResponse {
            run_id: handle.run_id,
            status: RunStatus::Pending,
            report: None,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub template_id: Option<String>,
    pub workflow: Option<WorkflowDefinition>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    /// Override the definition's execution mode
    pub mode: Option<ExecutionMode>,
    /// Block until the run finishes (default: false)
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRunResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunStatusReport>,
}

/// Get the status of a run
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunStatusReport>> {
    let run_id = parse_run_id(&run_id)?;

    let report = state
        .engine
        .get_status(run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Run {} not found", run_id)))?;

    Ok(Json(report))
}

/// Get events for a run
pub async fn get_run_events(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<GetRunEventsResponse>> {
    let run_id = parse_run_id(&run_id)?;

    if state.engine.get_status(run_id).await?.is_none() {
        return Err(ApiError::not_found(format!("Run {} not found", run_id)));
    }
    let events = state.engine.get_run_events(run_id).await?;

    Ok(Json(GetRunEventsResponse { events }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRunEventsResponse {
    pub events: Vec<Event>,
}

/// Cancel an active run
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<CancelRunResponse>> {
    let run_id = parse_run_id(&run_id)?;
    let cancelled = state.engine.cancel(run_id).await;
    Ok(Json(CancelRunResponse { cancelled }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub cancelled: bool,
}

/// Snapshot of engine metrics
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.engine.metrics().snapshot())
}

/// Capability alerts and the health report derived from them
pub async fn get_alerts(State(state): State<Arc<AppState>>) -> Json<AlertsResponse> {
    let metrics = state.engine.metrics();
    Json(AlertsResponse {
        alerts: metrics.alerts(),
        health: metrics.health_report(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub health: HealthReport,
}
