//! Job CRUD, logs, and stop routes.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use jobrunner_core::{Job, JobId, JobSpec};
use jobrunner_store::JobStore;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/logs", get(get_job_logs))
        .route("/jobs/{id}/stop", post(stop_job))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::from_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}

async fn create_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    spec.validate().map_err(ApiError::BadRequest)?;

    let job = state.store.add(spec.into_job()).await;
    info!(job_id = %job.id, image = %job.image, "job created");

    state
        .manager
        .submit(job.clone())
        .await
        .map_err(|_| ApiError::Internal("job manager is not accepting new jobs".to_string()))?;

    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.store.find(id).await?;
    Ok(Json(job))
}

async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<String, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.store.find(id).await?;

    let mut logs = String::new();
    for container_id in &job.containers {
        let mut stream = state
            .driver
            .container_logs(container_id)
            .await
            .map_err(ApiError::from)?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ApiError::from)?;
            logs.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    Ok(logs)
}

async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_job_id(&id)?;
    // Confirm the job exists before acknowledging the stop request.
    state.store.find(id).await?;
    state.manager.stop(id);
    Ok(StatusCode::ACCEPTED)
}
