use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;

use crate::models::{JobType, Worker, WorkerStats, WorkerStatus};
use crate::{Error, Result};

/// Durable record of each worker's identity and status (C4).
#[derive(Clone)]
pub struct WorkerStore {
    pool: SqlitePool,
}

impl WorkerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job_type: JobType) -> Result<Worker> {
        let now = Utc::now();

        let id = sqlx::query(
            "INSERT INTO workers (type, status, is_active, last_active, created_at) VALUES (?, 'idle', 1, ?, ?)",
        )
        .bind(job_type.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .last_insert_rowid();

        Ok(Worker {
            id,
            job_type,
            status: WorkerStatus::Idle,
            is_active: true,
            last_active: now,
            created_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Worker> {
        let row = sqlx::query(
            "SELECT id, type, status, is_active, last_active, created_at FROM workers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::not_found(format!("worker {} not found", id)))?;

        row_to_worker(row)
    }

    pub async fn update_status(&self, id: i64, status: WorkerStatus) -> Result<()> {
        sqlx::query("UPDATE workers SET status = ?, last_active = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    pub async fn set_active(&self, id: i64, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE workers SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    /// List active workers of `job_type`, oldest first by id — the order
    /// `scaleWorkers` stops from when scaling down (§4.2).
    pub async fn list_active_by_type(&self, job_type: JobType) -> Result<Vec<Worker>> {
        let rows = sqlx::query(
            "SELECT id, type, status, is_active, last_active, created_at FROM workers WHERE type = ? AND is_active = 1 ORDER BY id ASC",
        )
        .bind(job_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(row_to_worker).collect()
    }

    pub async fn list_all_active(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query(
            "SELECT id, type, status, is_active, last_active, created_at FROM workers WHERE is_active = 1 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(row_to_worker).collect()
    }

    pub async fn stats(&self) -> Result<WorkerStats> {
        let rows = sqlx::query(
            "SELECT type, status, COUNT(*) as count FROM workers WHERE is_active = 1 GROUP BY type, status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut stats = WorkerStats::default();
        let mut by_type: HashMap<String, i64> = HashMap::new();

        for row in rows {
            let job_type: String = row.try_get("type").map_err(Error::Database)?;
            let status: String = row.try_get("status").map_err(Error::Database)?;
            let count: i64 = row.try_get("count").map_err(Error::Database)?;

            stats.total += count;
            *by_type.entry(job_type).or_insert(0) += count;

            match status.as_str() {
                "idle" => stats.idle += count,
                "busy" => stats.busy += count,
                _ => {}
            }
        }

        stats.by_type = by_type;
        Ok(stats)
    }
}

fn row_to_worker(row: sqlx::sqlite::SqliteRow) -> Result<Worker> {
    let job_type_str: String = row.try_get("type").map_err(Error::Database)?;
    let status_str: String = row.try_get("status").map_err(Error::Database)?;

    Ok(Worker {
        id: row.try_get("id").map_err(Error::Database)?,
        job_type: job_type_str.parse()?,
        status: status_str.parse()?,
        is_active: row.try_get::<bool, _>("is_active").map_err(Error::Database)?,
        last_active: row.try_get("last_active").map_err(Error::Database)?,
        created_at: row.try_get("created_at").map_err(Error::Database)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::create_pool;

    async fn test_store() -> WorkerStore {
        let pool = create_pool(":memory:", 1).await.unwrap();
        crate::store::migrate(&pool).await.unwrap();
        WorkerStore::new(pool)
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = test_store().await;
        let worker = store.create(JobType::Cronjob).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);

        let fetched = store.get(worker.id).await.unwrap();
        assert_eq!(fetched.job_type, JobType::Cronjob);
    }

    #[tokio::test]
    async fn scale_down_removes_oldest_first() {
        let store = test_store().await;
        let first = store.create(JobType::Sms).await.unwrap();
        let second = store.create(JobType::Sms).await.unwrap();
        let third = store.create(JobType::Sms).await.unwrap();

        let active = store.list_active_by_type(JobType::Sms).await.unwrap();
        assert_eq!(active.len(), 3);

        // Oldest-first stop order per §4.2: caller stops `first`, then
        // `second`, when scaling down by two.
        store.set_active(first.id, false).await.unwrap();
        store.set_active(second.id, false).await.unwrap();

        let active = store.list_active_by_type(JobType::Sms).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, third.id);
    }

    #[tokio::test]
    async fn stats_sum_equals_total() {
        let store = test_store().await;
        let w = store.create(JobType::Whatsapp).await.unwrap();
        store.update_status(w.id, WorkerStatus::Busy).await.unwrap();
        store.create(JobType::Whatsapp).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, stats.idle + stats.busy);
        assert_eq!(stats.total, 2);
    }
}
