//! Worker Supervisor (C5): spawns, monitors, restarts, and scales worker
//! processes.
//!
//! The coordinator does not import worker code and vice versa (§9) — they
//! talk only through the queue transport's pub/sub and the coordinator's
//! HTTP API. The supervisor here holds opaque `tokio::process::Child`
//! handles; it never reaches into what the worker process actually does.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;
use crate::models::{JobType, Worker};
use crate::store::WorkerStore;
use crate::{Error, Result};

struct ManagedWorker {
    job_type: JobType,
    child: Mutex<Child>,
}

/// Holds an in-memory mapping from worker id to live child-process handle.
#[derive(Clone)]
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    workers: Arc<DashMap<i64, Arc<ManagedWorker>>>,
    worker_store: WorkerStore,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, worker_store: WorkerStore) -> Self {
        Self {
            config: Arc::new(config),
            workers: Arc::new(DashMap::new()),
            worker_store,
        }
    }

    /// Read all Worker records and spawn a child process for each.
    pub async fn init(&self) -> Result<()> {
        let workers = self.worker_store.list_all_active().await?;
        for worker in workers {
            self.start_worker(worker.id, worker.job_type).await?;
        }
        Ok(())
    }

    /// Spawn a child tagged with `id`/`job_type`; wires stdout/stderr to
    /// structured logs and, on non-zero exit, respawns with the same id
    /// and type indefinitely (§9's open question: no backoff ceiling).
    pub async fn start_worker(&self, id: i64, job_type: JobType) -> Result<()> {
        let child = self.spawn_child(id, job_type)?;
        let managed = Arc::new(ManagedWorker {
            job_type,
            child: Mutex::new(child),
        });
        self.workers.insert(id, managed.clone());

        let workers = self.workers.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            Self::monitor(id, job_type, managed, workers, config).await;
        });

        Ok(())
    }

    fn spawn_child(&self, id: i64, job_type: JobType) -> Result<Child> {
        let mut child = Command::new(&self.config.worker_binary_path)
            .arg("--worker-id")
            .arg(id.to_string())
            .arg("--worker-type")
            .arg(job_type.as_str())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| Error::fatal(format!("failed to spawn worker {}: {}", id, e)))?;

        drain_child_output(id, job_type, &mut child);

        info!(worker_id = id, %job_type, "spawned worker process");
        Ok(child)
    }

    async fn monitor(
        id: i64,
        job_type: JobType,
        managed: Arc<ManagedWorker>,
        workers: Arc<DashMap<i64, Arc<ManagedWorker>>>,
        config: Arc<SupervisorConfig>,
    ) {
        loop {
            let status = {
                let mut child = managed.child.lock().await;
                child.wait().await
            };

            match status {
                Ok(status) if status.success() => {
                    info!(worker_id = id, "worker exited cleanly, not restarting");
                    workers.remove(&id);
                    return;
                }
                Ok(status) => {
                    warn!(worker_id = id, code = ?status.code(), "worker crashed, respawning");
                }
                Err(e) => {
                    error!(worker_id = id, error = %e, "failed to wait on worker process");
                }
            }

            // Respawning stopped workers races a concurrent stop_worker
            // call; if the id was removed in the meantime, stand down.
            if !workers.contains_key(&id) {
                return;
            }

            match Command::new(&config.worker_binary_path)
                .arg("--worker-id")
                .arg(id.to_string())
                .arg("--worker-type")
                .arg(job_type.as_str())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
            {
                Ok(mut new_child) => {
                    drain_child_output(id, job_type, &mut new_child);
                    *managed.child.lock().await = new_child;
                }
                Err(e) => {
                    error!(worker_id = id, error = %e, "failed to respawn crashed worker");
                    return;
                }
            }
        }
    }

    /// Register a new Worker record, then start it.
    pub async fn create_worker(&self, job_type: JobType) -> Result<Worker> {
        let worker = self.worker_store.create(job_type).await?;
        self.start_worker(worker.id, job_type).await?;
        Ok(worker)
    }

    /// Send a termination signal and drop the handle; returns whether a
    /// handle existed.
    pub async fn stop_worker(&self, id: i64) -> Result<bool> {
        let Some((_, managed)) = self.workers.remove(&id) else {
            return Ok(false);
        };

        let mut child = managed.child.lock().await;
        if let Err(e) = child.start_kill() {
            warn!(worker_id = id, error = %e, "failed to signal worker process");
        }

        self.worker_store.set_active(id, false).await?;
        info!(worker_id = id, "stopped worker");
        Ok(true)
    }

    /// Scale workers of `job_type` to `desired`. Not atomic with
    /// concurrent create/stop calls — callers are expected to serialize
    /// (§4.2).
    pub async fn scale(&self, job_type: JobType, desired: u32) -> Result<()> {
        if desired == 0 || desired > self.config.max_scale {
            return Err(Error::validation(format!(
                "scale count must be in [1, {}]",
                self.config.max_scale
            )));
        }

        let current = self.worker_store.list_active_by_type(job_type).await?;
        let current_count = current.len() as u32;

        if current_count < desired {
            for _ in 0..(desired - current_count) {
                self.create_worker(job_type).await?;
            }
        } else if current_count > desired {
            let to_stop = (current_count - desired) as usize;
            for worker in current.into_iter().take(to_stop) {
                self.stop_worker(worker.id).await?;
            }
        }

        Ok(())
    }

    /// Stop every known worker, in shutdown order.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.workers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Err(e) = self.stop_worker(id).await {
                warn!(worker_id = id, error = %e, "error stopping worker during shutdown");
            }
        }
    }
}

/// Takes `child`'s stdout/stderr pipes and spawns a reader task per stream
/// that forwards each line into `tracing`. Left undrained, the pipe buffer
/// fills once the worker's own `tracing_subscriber::fmt()` writes enough to
/// it and the worker blocks on its next write — this is what keeps that
/// from happening.
fn drain_child_output(id: i64, job_type: JobType, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(worker_id = id, %job_type, line = %line, "worker stdout");
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(worker_id = id, %job_type, line = %line, "worker stderr");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::create_pool;

    async fn test_supervisor() -> Supervisor {
        let pool = create_pool(":memory:", 1).await.unwrap();
        crate::store::migrate(&pool).await.unwrap();
        let store = WorkerStore::new(pool);
        Supervisor::new(
            SupervisorConfig {
                workers_per_type: 1,
                max_scale: 16,
                worker_binary_path: "jobforge-worker".to_string(),
            },
            store,
        )
    }

    #[tokio::test]
    async fn scale_rejects_zero() {
        let supervisor = test_supervisor().await;
        let err = supervisor.scale(JobType::Sms, 0).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn scale_rejects_above_max() {
        let supervisor = test_supervisor().await;
        let err = supervisor.scale(JobType::Sms, 17).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn stop_unknown_worker_returns_false() {
        let supervisor = test_supervisor().await;
        let stopped = supervisor.stop_worker(9999).await.unwrap();
        assert!(!stopped);
    }
}
