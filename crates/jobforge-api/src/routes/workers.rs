use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use jobforge_core::models::{JobType, Worker, WorkerStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::routes::error::ApiResult;
use crate::routes::jobs::SuccessResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWorkerRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
}

#[derive(Debug, Serialize)]
pub struct CreateWorkerResponse {
    #[serde(rename = "workerId")]
    pub worker_id: i64,
}

/// POST /api/workers
pub async fn create_worker(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkerRequest>,
) -> ApiResult<(StatusCode, Json<CreateWorkerResponse>)> {
    let worker = state.supervisor.create_worker(req.job_type).await?;
    info!(worker_id = worker.id, %req.job_type, "created worker");
    Ok((
        StatusCode::CREATED,
        Json(CreateWorkerResponse { worker_id: worker.id }),
    ))
}

#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub worker: Worker,
}

/// GET /api/workers/:id
pub async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WorkerResponse>> {
    let worker = state.worker_store.get(id).await?;
    Ok(Json(WorkerResponse { worker }))
}

/// DELETE /api/workers/:id
pub async fn stop_worker(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SuccessResponse>> {
    let stopped = state.supervisor.stop_worker(id).await?;
    if !stopped {
        return Err(jobforge_core::Error::not_found(format!("worker {} not found", id)).into());
    }
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkerStatusRequest {
    pub status: WorkerStatus,
}

/// PATCH /api/workers/:id
pub async fn update_worker_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateWorkerStatusRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    state.worker_store.update_status(id, req.status).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct ScaleWorkersRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub count: u32,
}

/// POST /api/workers/scale
pub async fn scale_workers(
    State(state): State<AppState>,
    Json(req): Json<ScaleWorkersRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    state.supervisor.scale(req.job_type, req.count).await?;
    Ok(Json(SuccessResponse { success: true }))
}
