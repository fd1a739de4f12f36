pub mod error;
pub mod jobs;
pub mod stats;
pub mod workers;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// The full `/api/*` surface from the external interfaces table (§6).
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/:id", get(jobs::get_job).patch(jobs::update_job_status))
        .route("/jobs/next/:type", get(jobs::claim_next_job))
        .route("/workers", post(workers::create_worker))
        .route(
            "/workers/:id",
            get(workers::get_worker)
                .delete(workers::stop_worker)
                .patch(workers::update_worker_status),
        )
        .route("/workers/scale", post(workers::scale_workers))
        .route("/stats", get(stats::get_stats))
}
