//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::types::{HealthResponse, RunAgentRequest, RunPipelineQuery};
use crate::agent::AgentResult;
use crate::config::Config;
use crate::pipeline::{Orchestrator, OrchestratorError, PipelineConfig, PipelineState};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/pipelines", post(run_pipeline).get(list_pipelines))
        .route("/api/pipelines/:id", get(get_pipeline))
        .route("/api/agents/:step/run", post(run_agent))
        .with_state(state)
}

fn error_status(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::UnknownStep(_)
        | OrchestratorError::NoSteps
        | OrchestratorError::AgentNotConfigured(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Aborted | OrchestratorError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn into_response_error(err: OrchestratorError) -> (StatusCode, String) {
    (error_status(&err), err.to_string())
}

fn require_ids(subject_id: &str, actor_id: &str) -> Result<(), (StatusCode, String)> {
    if subject_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "subject_id is required".to_string()));
    }
    if actor_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "actor_id is required".to_string()));
    }
    Ok(())
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.default_model.clone(),
        steps: state
            .orchestrator
            .steps()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
    })
}

/// Run a pipeline. With `?async=true` the run continues in the background
/// and the initial `running` state is returned with 202.
async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunPipelineQuery>,
    Json(req): Json<PipelineConfig>,
) -> Result<(StatusCode, Json<PipelineState>), (StatusCode, String)> {
    require_ids(&req.subject_id, &req.actor_id)?;

    if query.run_async {
        let pipeline = state
            .orchestrator
            .spawn_pipeline(req)
            .await
            .map_err(into_response_error)?;
        return Ok((StatusCode::ACCEPTED, Json(pipeline)));
    }

    let pipeline = state
        .orchestrator
        .run_pipeline(req)
        .await
        .map_err(into_response_error)?;
    Ok((StatusCode::OK, Json(pipeline)))
}

async fn list_pipelines(State(state): State<Arc<AppState>>) -> Json<Vec<PipelineState>> {
    Json(state.orchestrator.list_pipelines().await)
}

async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineState>, (StatusCode, String)> {
    state
        .orchestrator
        .get_status(id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Pipeline {} not found", id)))
}

async fn run_agent(
    State(state): State<Arc<AppState>>,
    Path(step): Path<String>,
    Json(req): Json<RunAgentRequest>,
) -> Result<Json<AgentResult>, (StatusCode, String)> {
    require_ids(&req.subject_id, &req.actor_id)?;

    let config = PipelineConfig {
        subject_id: req.subject_id,
        actor_id: req.actor_id,
        task: req.task,
        steps: None,
        context: Default::default(),
    };
    state
        .orchestrator
        .run_single_agent(&step, &config, req.context)
        .await
        .map(Json)
        .map_err(into_response_error)
}
