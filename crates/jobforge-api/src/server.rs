use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use jobforge_core::cache::{QueueMessage, QueueTransport, RedisPool, RedisRateLimiter};
use jobforge_core::store::{self, JobStore, WorkerStore};
use jobforge_core::supervisor::Supervisor;
use jobforge_core::{Config, Result};

use crate::routes::api_router;
use crate::state::AppState;

pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| jobforge_core::Error::Config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    let app_state = create_app_state(&config).await?;
    app_state.supervisor.init().await?;

    spawn_completion_consumer(app_state.clone());

    let app = build_router(app_state.clone());

    info!("jobforge dispatch coordinator listening on http://{}", addr);
    log_routes();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| jobforge_core::Error::Network(e.to_string()))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state))
        .await
        .map_err(|e| jobforge_core::Error::Network(e.to_string()))?;

    Ok(())
}

async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping workers");
    state.supervisor.shutdown().await;
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn log_routes() {
    info!("Available routes:");
    info!("  GET    /health                - Health check");
    info!("  POST   /api/jobs              - Create job");
    info!("  GET    /api/jobs/:id          - Get job");
    info!("  PATCH  /api/jobs/:id          - Update job status");
    info!("  GET    /api/jobs/next/:type   - Claim next pending job");
    info!("  POST   /api/workers           - Create worker");
    info!("  GET    /api/workers/:id       - Get worker");
    info!("  DELETE /api/workers/:id       - Stop worker");
    info!("  PATCH  /api/workers/:id       - Update worker status");
    info!("  POST   /api/workers/scale     - Scale workers of a type");
    info!("  GET    /api/stats             - Aggregate job/worker stats");
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let job_store_ok = state.job_store.stats().await.is_ok();
    let queue_ok = state.queue.get_next_job("__health__").await.is_ok();

    Json(serde_json::json!({
        "status": if job_store_ok && queue_ok { "ok" } else { "degraded" },
        "jobStore": job_store_ok,
        "queueTransport": queue_ok,
    }))
}

/// Build every long-lived handle the coordinator needs and wire them into
/// one [`AppState`].
async fn create_app_state(config: &Config) -> Result<AppState> {
    info!("opening primary database at {}", config.database.path);
    let pool = store::create_pool(&config.database.path, config.database.pool_size).await?;
    store::migrate(&pool).await?;

    let job_store = JobStore::new(pool.clone());
    let worker_store = WorkerStore::new(pool);

    info!("connecting to Redis at {}", config.redis.url);
    let redis_config = jobforge_core::cache::RedisConfig::from(&config.redis);
    let redis_pool = RedisPool::new(redis_config.clone()).await?;

    let queue = QueueTransport::new(redis_pool.clone());
    let rate_limiter = RedisRateLimiter::new(redis_pool, redis_config).await?;

    let supervisor = Supervisor::new(config.supervisor.clone(), worker_store.clone());

    Ok(AppState::new(
        Arc::new(config.clone()),
        job_store,
        worker_store,
        queue,
        rate_limiter,
        supervisor,
    ))
}

/// The §4.1.3 completion handlers: subscribe to the queue transport's
/// pub/sub and finalize Job/Worker state on `worker:job-complete` and
/// `worker:job-failed`. Idempotent — replaying the same event twice lands
/// on the same terminal state.
fn spawn_completion_consumer(state: AppState) {
    tokio::spawn(async move {
        let mut rx = match state.queue.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                error!(error = %e, "failed to subscribe to completion channels, handlers disabled");
                return;
            }
        };

        while let Some(message) = rx.recv().await {
            match message {
                QueueMessage::JobComplete(event) => {
                    if let Err(e) = state
                        .job_store
                        .update_status(
                            event.job_id,
                            jobforge_core::models::JobStatus::Completed,
                            Some(event.worker_id),
                            event.result,
                        )
                        .await
                    {
                        warn!(job_id = event.job_id, error = %e, "failed to finalize completed job");
                    }
                    if let Err(e) = state
                        .worker_store
                        .update_status(event.worker_id, jobforge_core::models::WorkerStatus::Idle)
                        .await
                    {
                        warn!(worker_id = event.worker_id, error = %e, "failed to mark worker idle");
                    }
                }
                QueueMessage::JobFailed(event) => {
                    let result = event
                        .error
                        .map(|error| serde_json::json!({ "error": error }));
                    if let Err(e) = state
                        .job_store
                        .update_status(
                            event.job_id,
                            jobforge_core::models::JobStatus::Failed,
                            Some(event.worker_id),
                            result,
                        )
                        .await
                    {
                        warn!(job_id = event.job_id, error = %e, "failed to finalize failed job");
                    }
                    if let Err(e) = state
                        .worker_store
                        .update_status(event.worker_id, jobforge_core::models::WorkerStatus::Idle)
                        .await
                    {
                        warn!(worker_id = event.worker_id, error = %e, "failed to mark worker idle");
                    }
                }
                QueueMessage::JobNew(_) => {
                    // Consumed by worker runtimes, not the coordinator.
                }
            }
        }
    });
}
