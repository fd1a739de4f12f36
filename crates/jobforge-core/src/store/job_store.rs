use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;

use crate::models::{Job, JobStats, JobStatus, JobType};
use crate::{Error, Result};

/// Durable record of each job's state, payload, and result (C3).
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending Job. Caller has already validated the payload
    /// (`Job::validate_payload`).
    pub async fn create(&self, job_type: JobType, payload: serde_json::Value) -> Result<Job> {
        let now = Utc::now();
        let payload_str = serde_json::to_string(&payload)?;

        let id = sqlx::query(
            r#"
            INSERT INTO jobs (type, payload, status, worker_id, result, created_at, updated_at)
            VALUES (?, ?, 'pending', NULL, NULL, ?, ?)
            "#,
        )
        .bind(job_type.as_str())
        .bind(&payload_str)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .last_insert_rowid();

        Ok(Job {
            id,
            job_type,
            payload,
            status: JobStatus::Pending,
            worker_id: None,
            result: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Job> {
        let row = sqlx::query(
            "SELECT id, type, payload, status, worker_id, result, created_at, updated_at FROM jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::not_found(format!("job {} not found", id)))?;

        row_to_job(row)
    }

    /// Idempotent setter for {status, workerId, result}; intended for
    /// internal use by workers reporting job outcomes (§4.1.1/§4.1.3).
    pub async fn update_status(
        &self,
        id: i64,
        status: JobStatus,
        worker_id: Option<i64>,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let result_str = result.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, worker_id = COALESCE(?, worker_id), result = COALESCE(?, result), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(worker_id)
        .bind(result_str)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    /// Claim protocol (§4.1.2): select the oldest pending job of `job_type`
    /// and atomically flip it to processing under `worker_id`. Returns
    /// `None` both when there is no candidate and when a concurrent worker
    /// won the race — both are "no job for you right now", not errors.
    pub async fn claim_next(&self, job_type: JobType, worker_id: i64) -> Result<Option<Job>> {
        let candidate = sqlx::query(
            "SELECT id FROM jobs WHERE status = 'pending' AND type = ? ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(job_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };
        let candidate_id: i64 = candidate.try_get("id").map_err(Error::Database)?;

        let now = Utc::now();
        let affected = sqlx::query(
            "UPDATE jobs SET status = 'processing', worker_id = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(worker_id)
        .bind(now)
        .bind(candidate_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if affected == 0 {
            // Some other worker won the race.
            return Ok(None);
        }

        Ok(Some(self.get(candidate_id).await?))
    }

    pub async fn stats(&self) -> Result<JobStats> {
        let rows = sqlx::query("SELECT type, status, COUNT(*) as count FROM jobs GROUP BY type, status")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut stats = JobStats::default();
        let mut by_type: HashMap<String, i64> = HashMap::new();

        for row in rows {
            let job_type: String = row.try_get("type").map_err(Error::Database)?;
            let status: String = row.try_get("status").map_err(Error::Database)?;
            let count: i64 = row.try_get("count").map_err(Error::Database)?;

            stats.total += count;
            *by_type.entry(job_type).or_insert(0) += count;

            match status.as_str() {
                "pending" => stats.pending += count,
                "processing" => stats.processing += count,
                "completed" => stats.completed += count,
                "failed" => stats.failed += count,
                _ => {}
            }
        }

        stats.by_type = by_type;
        Ok(stats)
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job> {
    let job_type_str: String = row.try_get("type").map_err(Error::Database)?;
    let status_str: String = row.try_get("status").map_err(Error::Database)?;
    let payload_str: String = row.try_get("payload").map_err(Error::Database)?;
    let result_str: Option<String> = row.try_get("result").map_err(Error::Database)?;

    Ok(Job {
        id: row.try_get("id").map_err(Error::Database)?,
        job_type: job_type_str.parse()?,
        payload: serde_json::from_str(&payload_str)?,
        status: status_str.parse()?,
        worker_id: row.try_get("worker_id").map_err(Error::Database)?,
        result: result_str.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: row.try_get("created_at").map_err(Error::Database)?,
        updated_at: row.try_get("updated_at").map_err(Error::Database)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::create_pool;

    async fn test_store() -> JobStore {
        let pool = create_pool(":memory:", 1).await.unwrap();
        crate::store::migrate(&pool).await.unwrap();
        JobStore::new(pool)
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = test_store().await;
        let job = store
            .create(JobType::Sms, serde_json::json!({"to": "+1"}))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);

        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.job_type, JobType::Sms);
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let store = test_store().await;
        let err = store.get(9999).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn claim_next_is_fifo_and_single_winner() {
        let store = test_store().await;
        let first = store
            .create(JobType::Whatsapp, serde_json::json!({"to": "a"}))
            .await
            .unwrap();
        let _second = store
            .create(JobType::Whatsapp, serde_json::json!({"to": "b"}))
            .await
            .unwrap();

        let claimed = store.claim_next(JobType::Whatsapp, 1).await.unwrap();
        assert_eq!(claimed.unwrap().id, first.id);

        // Re-claiming the same already-processing job must yield None.
        let second_claim_attempt = sqlx::query(
            "UPDATE jobs SET status='processing', worker_id=2 WHERE id = ? AND status = 'pending'",
        )
        .bind(first.id)
        .execute(&store.pool)
        .await
        .unwrap();
        assert_eq!(second_claim_attempt.rows_affected(), 0);
    }

    #[tokio::test]
    async fn stats_sum_equals_total() {
        let store = test_store().await;
        store
            .create(JobType::Email, serde_json::json!({"to": "a"}))
            .await
            .unwrap();
        let job = store
            .create(JobType::Email, serde_json::json!({"to": "b"}))
            .await
            .unwrap();
        store
            .update_status(job.id, JobStatus::Processing, Some(1), None)
            .await
            .unwrap();
        store
            .update_status(job.id, JobStatus::Completed, None, Some(serde_json::json!({"ok": true})))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, stats.pending + stats.processing + stats.completed + stats.failed);
        assert_eq!(stats.total, 2);
    }
}
