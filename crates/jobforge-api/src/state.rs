use jobforge_core::cache::{QueueTransport, RedisRateLimiter};
use jobforge_core::store::{JobStore, WorkerStore};
use jobforge_core::supervisor::Supervisor;
use jobforge_core::Config;
use std::sync::Arc;

/// Shared application state for the Dispatch Coordinator. Holds handles to
/// everything a route needs: no request touches a connection pool or
/// process table directly.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub job_store: JobStore,
    pub worker_store: WorkerStore,
    pub queue: QueueTransport,
    pub rate_limiter: RedisRateLimiter,
    pub supervisor: Supervisor,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        job_store: JobStore,
        worker_store: WorkerStore,
        queue: QueueTransport,
        rate_limiter: RedisRateLimiter,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            config,
            job_store,
            worker_store,
            queue,
            rate_limiter,
            supervisor,
        }
    }
}
