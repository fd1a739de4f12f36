use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use jobforge_core::models::{Job, JobStatus, JobType};
use jobforge_core::Error;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::routes::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    #[serde(rename = "jobId")]
    pub job_id: i64,
}

/// POST /api/jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    Job::validate_payload(&req.payload)?;

    let allowed = state
        .rate_limiter
        .check(
            "jobs:create",
            state.config.rate_limit.max_tokens,
            state.config.rate_limit.refill_rate,
            state.config.rate_limit.key_expiry(),
        )
        .await
        .map_err(Error::from)?;

    if !allowed {
        return Err(Error::transient("rate limit exceeded, retry after a short delay").into());
    }

    let job = state.job_store.create(req.job_type, req.payload.clone()).await?;

    if let Err(e) = state
        .queue
        .add_job(job.id, req.job_type.as_str(), &req.payload)
        .await
    {
        warn!(job_id = job.id, error = %e, "failed to enqueue job to backlog");
    }

    info!(job_id = job.id, %req.job_type, "created job");
    Ok((StatusCode::CREATED, Json(CreateJobResponse { job_id: job.id })))
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: Job,
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.job_store.get(id).await?;
    Ok(Json(JobResponse { job }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobStatusRequest {
    pub status: JobStatus,
    #[serde(rename = "workerId", default)]
    pub worker_id: Option<i64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// PATCH /api/jobs/:id
pub async fn update_job_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateJobStatusRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    state
        .job_store
        .update_status(id, req.status, req.worker_id, req.result)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
pub struct NextJobResponse {
    pub job: Option<Job>,
}

/// GET /api/jobs/next/:type — the claim operation (§4.1.2). Requires a
/// worker id to claim under, passed as a query parameter.
pub async fn claim_next_job(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    axum::extract::Query(params): axum::extract::Query<ClaimQuery>,
) -> ApiResult<Json<NextJobResponse>> {
    let job_type: JobType = job_type.parse()?;
    let job = state.job_store.claim_next(job_type, params.worker_id).await?;
    Ok(Json(NextJobResponse { job }))
}

#[derive(Debug, Deserialize)]
pub struct ClaimQuery {
    #[serde(rename = "workerId")]
    pub worker_id: i64,
}
