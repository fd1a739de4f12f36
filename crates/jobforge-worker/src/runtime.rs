use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use jobforge_core::adapters::Adapter;
use jobforge_core::cache::{QueueMessage, QueueTransport, RedisPool};
use jobforge_core::models::{Job, JobType, Worker, WorkerStatus};
use jobforge_core::{Config, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a [`WorkerRuntime`] needs to start that isn't already in the
/// shared [`Config`].
pub struct WorkerConfig {
    pub worker_id: i64,
    pub job_type: JobType,
    pub coordinator_url: String,
}

/// One worker runtime's event loop, bound to a single worker id and job
/// type. Owns its own HTTP client, queue transport handle, and dispatch
/// adapter for the lifetime of the process.
pub struct WorkerRuntime {
    worker_id: i64,
    job_type: JobType,
    coordinator_url: String,
    http: reqwest::Client,
    queue: QueueTransport,
    adapter: Adapter,
}

impl WorkerRuntime {
    pub async fn new(worker_config: WorkerConfig, config: &Config) -> Result<Self> {
        let redis_config = jobforge_core::cache::RedisConfig::from(&config.redis);
        let redis_pool = RedisPool::new(redis_config).await?;
        let queue = QueueTransport::new(redis_pool);
        let adapter = Adapter::for_job_type(worker_config.job_type, config).await?;

        Ok(Self {
            worker_id: worker_config.worker_id,
            job_type: worker_config.job_type,
            coordinator_url: worker_config.coordinator_url,
            http: reqwest::Client::new(),
            queue,
            adapter,
        })
    }

    /// Poll every second, and also wake early on a matching `job:new`
    /// event. Either trigger runs the same tick; a lost pub/sub event just
    /// means the next second's tick picks the job up instead. Runs until
    /// the process is killed.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            worker_id = self.worker_id,
            job_type = %self.job_type,
            coordinator_url = %self.coordinator_url,
            "worker runtime entering poll loop"
        );

        let mut rx = match self.queue.subscribe().await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(error = %e, "failed to subscribe to job:new, falling back to polling only");
                None
            }
        };

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let mut closed = false;
            let wake = match rx.as_mut() {
                Some(receiver) => tokio::select! {
                    _ = interval.tick() => true,
                    message = receiver.recv() => match message {
                        Some(QueueMessage::JobNew(event)) => event.job_type == self.job_type.as_str(),
                        Some(_) => false,
                        None => {
                            closed = true;
                            true
                        }
                    },
                },
                None => {
                    interval.tick().await;
                    true
                }
            };

            if closed {
                warn!("job:new subscription closed, falling back to polling only");
                rx = None;
            }

            if wake {
                self.tick().await;
            }
        }
    }

    /// One iteration of the §4.4 polling loop.
    async fn tick(&mut self) {
        let worker = match self.get_worker().await {
            Ok(worker) => worker,
            Err(e) => {
                warn!(worker_id = self.worker_id, error = %e, "failed to read own worker record");
                return;
            }
        };

        if worker.status == WorkerStatus::Busy {
            return;
        }

        if let Err(e) = self.set_worker_status(WorkerStatus::Idle).await {
            warn!(worker_id = self.worker_id, error = %e, "failed to mark worker idle");
        }

        let job = match self.claim_next_job().await {
            Ok(job) => job,
            Err(e) => {
                warn!(worker_id = self.worker_id, error = %e, "failed to claim next job");
                return;
            }
        };

        let Some(job) = job else {
            return;
        };

        if let Err(e) = self.set_worker_status(WorkerStatus::Busy).await {
            warn!(worker_id = self.worker_id, error = %e, "failed to mark worker busy");
        }

        self.process_job(job).await;
    }

    async fn process_job(&mut self, job: Job) {
        if let Err(e) = self.set_job_processing(job.id).await {
            warn!(job_id = job.id, error = %e, "failed to mark job processing");
        }

        let outcome = self
            .adapter
            .execute(job.job_type, self.worker_id, &job.payload)
            .await;

        match outcome {
            Ok(result) => {
                if let Err(e) = self.set_job_completed(job.id, result.clone()).await {
                    warn!(job_id = job.id, error = %e, "failed to mark job completed");
                }
                if let Err(e) = self.queue.job_complete(job.id, self.worker_id, result).await {
                    warn!(job_id = job.id, error = %e, "failed to publish worker:job-complete");
                }
            }
            Err(e) => {
                error!(job_id = job.id, error = %e, "job execution failed");
                let message = e.to_string();
                if let Err(e) = self.set_job_failed(job.id, message.clone()).await {
                    warn!(job_id = job.id, error = %e, "failed to mark job failed");
                }
                if let Err(e) = self.queue.job_failed(job.id, self.worker_id, message).await {
                    warn!(job_id = job.id, error = %e, "failed to publish worker:job-failed");
                }
            }
        }

        if let Err(e) = self.set_worker_status(WorkerStatus::Idle).await {
            warn!(worker_id = self.worker_id, error = %e, "failed to mark worker idle after job");
        }
    }

    async fn get_worker(&self) -> Result<Worker> {
        let url = format!("{}/api/workers/{}", self.coordinator_url, self.worker_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| jobforge_core::Error::Network(e.to_string()))?
            .json::<WorkerResponse>()
            .await
            .map_err(|e| jobforge_core::Error::Network(e.to_string()))?;
        Ok(response.worker)
    }

    async fn claim_next_job(&self) -> Result<Option<Job>> {
        let url = format!(
            "{}/api/jobs/next/{}?workerId={}",
            self.coordinator_url,
            self.job_type.as_str(),
            self.worker_id
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| jobforge_core::Error::Network(e.to_string()))?
            .json::<NextJobResponse>()
            .await
            .map_err(|e| jobforge_core::Error::Network(e.to_string()))?;
        Ok(response.job)
    }

    async fn set_worker_status(&self, status: WorkerStatus) -> Result<()> {
        let url = format!("{}/api/workers/{}", self.coordinator_url, self.worker_id);
        self.http
            .patch(&url)
            .json(&UpdateWorkerStatusRequest { status: status.as_str() })
            .send()
            .await
            .map_err(|e| jobforge_core::Error::Network(e.to_string()))?;
        Ok(())
    }

    async fn set_job_processing(&self, job_id: i64) -> Result<()> {
        self.patch_job(
            job_id,
            UpdateJobStatusRequest {
                status: "processing",
                worker_id: Some(self.worker_id),
                result: None,
            },
        )
        .await
    }

    async fn set_job_completed(&self, job_id: i64, result: Value) -> Result<()> {
        self.patch_job(
            job_id,
            UpdateJobStatusRequest {
                status: "completed",
                worker_id: None,
                result: Some(result),
            },
        )
        .await
    }

    async fn set_job_failed(&self, job_id: i64, error: String) -> Result<()> {
        self.patch_job(
            job_id,
            UpdateJobStatusRequest {
                status: "failed",
                worker_id: None,
                result: Some(serde_json::json!({ "error": error })),
            },
        )
        .await
    }

    async fn patch_job(&self, job_id: i64, body: UpdateJobStatusRequest<'_>) -> Result<()> {
        let url = format!("{}/api/jobs/{}", self.coordinator_url, job_id);
        self.http
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| jobforge_core::Error::Network(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    worker: Worker,
}

#[derive(Debug, Deserialize)]
struct NextJobResponse {
    job: Option<Job>,
}

#[derive(Debug, Serialize)]
struct UpdateJobStatusRequest<'a> {
    status: &'a str,
    #[serde(rename = "workerId", skip_serializing_if = "Option::is_none")]
    worker_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

#[derive(Debug, Serialize)]
struct UpdateWorkerStatusRequest<'a> {
    status: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_update_omits_absent_fields() {
        let body = UpdateJobStatusRequest { status: "processing", worker_id: Some(3), result: None };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "processing", "workerId": 3 }));
    }

    #[test]
    fn job_status_update_carries_result_on_completion() {
        let body = UpdateJobStatusRequest {
            status: "completed",
            worker_id: None,
            result: Some(serde_json::json!({ "sent": true })),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "completed", "result": { "sent": true } }));
    }

    #[test]
    fn worker_status_update_serializes_bare_status() {
        let body = UpdateWorkerStatusRequest { status: "idle" };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "idle" }));
    }

    #[test]
    fn next_job_response_accepts_absent_job() {
        let parsed: NextJobResponse = serde_json::from_value(serde_json::json!({ "job": null })).unwrap();
        assert!(parsed.job.is_none());
    }
}
