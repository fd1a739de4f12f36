use axum::extract::State;
use axum::Json;
use jobforge_core::models::{JobStats, WorkerStats};
use serde::Serialize;

use crate::routes::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub jobs: JobStats,
    pub workers: WorkerStats,
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let jobs = state.job_store.stats().await?;
    let workers = state.worker_store.stats().await?;
    Ok(Json(StatsResponse { jobs, workers }))
}
