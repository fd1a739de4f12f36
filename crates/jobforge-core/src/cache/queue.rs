//! Queue Transport (C2): durable per-type FIFO backlog plus pub/sub
//! notifications.
//!
//! The backlog (`jobs:<type>` Redis lists) and the Job Store are two writes
//! that are not jointly atomic — that's fine, because the Job Store is the
//! source of truth for job lifecycle and the backlog is only a hint that
//! drives notification. A lost backlog entry just delays a job until the
//! next `job:new` event or poll tick.

use crate::cache::{CacheError, CacheResult, RedisPool};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub const CHANNEL_JOB_NEW: &str = "job:new";
pub const CHANNEL_WORKER_JOB_COMPLETE: &str = "worker:job-complete";
pub const CHANNEL_WORKER_JOB_FAILED: &str = "worker:job-failed";

/// Body published on `job:new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNewEvent {
    #[serde(rename = "type")]
    pub job_type: String,
}

/// Body published on `worker:job-complete` / `worker:job-failed`. Carries
/// the same outcome data as the worker's direct PATCH so a completion can
/// be finalized from the pub/sub event alone if the PATCH never lands
/// (§7's "report either via PATCH or via PUBLISH, whichever succeeds").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcomeEvent {
    pub job_id: i64,
    pub worker_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A backlog entry as stored in `jobs:<type>`. Carries enough to notify a
/// worker without round-tripping the Job Store; the worker still claims
/// through the coordinator's HTTP API, this is only the wake-up hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub id: i64,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
}

/// A message delivered to a queue subscriber.
#[derive(Debug, Clone)]
pub enum QueueMessage {
    JobNew(JobNewEvent),
    JobComplete(JobOutcomeEvent),
    JobFailed(JobOutcomeEvent),
}

fn backlog_key(job_type: &str) -> String {
    format!("jobs:{}", job_type)
}

/// Queue Transport client. Holds a [`RedisPool`] for LPUSH/RPOP/PUBLISH and
/// exposes a separate `subscribe` entry point for the pub/sub loop.
#[derive(Clone)]
pub struct QueueTransport {
    pool: RedisPool,
}

impl QueueTransport {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// LPUSH a JSON-encoded entry onto `jobs:<type>`, then PUBLISH `job:new`.
    pub async fn add_job(
        &self,
        id: i64,
        job_type: &str,
        payload: &serde_json::Value,
    ) -> CacheResult<()> {
        let entry = BacklogEntry {
            id,
            job_type: job_type.to_string(),
            payload: payload.clone(),
        };
        let encoded = serde_json::to_vec(&entry)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let mut conn = self.pool.get().await?;
        conn.lpush(&backlog_key(job_type), &encoded).await?;

        let event = JobNewEvent {
            job_type: job_type.to_string(),
        };
        let event_bytes = serde_json::to_vec(&event)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        conn.publish(CHANNEL_JOB_NEW, &event_bytes).await?;

        debug!(job_id = id, job_type, "enqueued job to backlog");
        Ok(())
    }

    /// RPOP `jobs:<type>` for the oldest pending backlog entry (FIFO).
    pub async fn get_next_job(&self, job_type: &str) -> CacheResult<Option<BacklogEntry>> {
        let mut conn = self.pool.get().await?;
        match conn.rpop(&backlog_key(job_type)).await? {
            Some(bytes) => {
                let entry: BacklogEntry = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub async fn job_complete(
        &self,
        job_id: i64,
        worker_id: i64,
        result: serde_json::Value,
    ) -> CacheResult<()> {
        self.publish_outcome(CHANNEL_WORKER_JOB_COMPLETE, job_id, worker_id, Some(result), None)
            .await
    }

    pub async fn job_failed(&self, job_id: i64, worker_id: i64, error: String) -> CacheResult<()> {
        self.publish_outcome(CHANNEL_WORKER_JOB_FAILED, job_id, worker_id, None, Some(error))
            .await
    }

    async fn publish_outcome(
        &self,
        channel: &str,
        job_id: i64,
        worker_id: i64,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> CacheResult<()> {
        let event = JobOutcomeEvent { job_id, worker_id, result, error };
        let bytes = serde_json::to_vec(&event)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let mut conn = self.pool.get().await?;
        conn.publish(channel, &bytes).await?;
        Ok(())
    }

    /// Subscribe to `job:new`, `worker:job-complete`, and
    /// `worker:job-failed`, forwarding decoded events to the returned
    /// channel. The subscriber task runs until the receiver is dropped or
    /// the pub/sub connection is lost.
    pub async fn subscribe(&self) -> CacheResult<mpsc::Receiver<QueueMessage>> {
        let mut pubsub = self.pool.pubsub().await?;
        pubsub
            .subscribe(CHANNEL_JOB_NEW)
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;
        pubsub
            .subscribe(CHANNEL_WORKER_JOB_COMPLETE)
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;
        pubsub
            .subscribe(CHANNEL_WORKER_JOB_FAILED)
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = pubsub.on_message();

            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to read pub/sub payload");
                        continue;
                    }
                };

                let decoded = match channel.as_str() {
                    CHANNEL_JOB_NEW => serde_json::from_slice::<JobNewEvent>(&payload)
                        .map(QueueMessage::JobNew)
                        .ok(),
                    CHANNEL_WORKER_JOB_COMPLETE => serde_json::from_slice::<JobOutcomeEvent>(&payload)
                        .map(QueueMessage::JobComplete)
                        .ok(),
                    CHANNEL_WORKER_JOB_FAILED => serde_json::from_slice::<JobOutcomeEvent>(&payload)
                        .map(QueueMessage::JobFailed)
                        .ok(),
                    other => {
                        warn!(channel = other, "message on unrecognized channel");
                        None
                    }
                };

                if let Some(message) = decoded {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                } else {
                    error!(channel, "failed to decode pub/sub payload");
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RedisConfig;

    #[tokio::test]
    async fn test_add_and_get_next_job_roundtrip() {
        let config = RedisConfig::development();
        if let Ok(pool) = RedisPool::new(config).await {
            let transport = QueueTransport::new(pool);
            let payload = serde_json::json!({"to": "+15555550100"});

            transport.add_job(42, "sms", &payload).await.unwrap();
            let entry = transport.get_next_job("sms").await.unwrap();

            assert!(entry.is_some());
            let entry = entry.unwrap();
            assert_eq!(entry.id, 42);
            assert_eq!(entry.job_type, "sms");
        }
    }

    #[tokio::test]
    async fn test_get_next_job_empty_backlog() {
        let config = RedisConfig::development();
        if let Ok(pool) = RedisPool::new(config).await {
            let transport = QueueTransport::new(pool);
            let entry = transport.get_next_job("nonexistent-type-xyz").await.unwrap();
            assert!(entry.is_none());
        }
    }
}
