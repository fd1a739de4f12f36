//! Script Runner (C10): resource-gated child-process execution with
//! task-scheduler log persistence.

use std::process::Stdio;

use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sysinfo::System;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::cache::RedisRateLimiter;
use crate::config::{RateLimitConfig, ScriptRunnerConfig};
use crate::{Error, Result};

/// Cap on buffered stdout/stderr per stream so a runaway script can't
/// exhaust the script runner's own memory.
const OUTPUT_BUFFER_LIMIT_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct ScriptRunResult {
    pub exit_code: i32,
    pub output: String,
    pub error: String,
}

/// Tracks {task id, is-running, start-running, pid} and an append-only log
/// of runs, owned externally by the operator's task scheduler but mutated
/// here by the Script Runner.
pub struct TaskSchedulerStore {
    pool: SqlitePool,
}

impl TaskSchedulerStore {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = crate::store::create_pool(path, 2).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                is_running INTEGER NOT NULL DEFAULT 0,
                start_running TEXT,
                pid INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL,
                output TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self { pool })
    }

    async fn mark_running(&self, task_id: &str, pid: Option<u32>) -> Result<i64> {
        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, is_running, start_running, pid) VALUES (?, 1, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET is_running = 1, start_running = excluded.start_running, pid = excluded.pid
            "#,
        )
        .bind(task_id)
        .bind(now)
        .bind(pid.map(|p| p as i64))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let log_id = sqlx::query("INSERT INTO task_log (task_id, start_time, status) VALUES (?, ?, 'running')")
            .bind(task_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .last_insert_rowid();

        Ok(log_id)
    }

    async fn log_waiting(&self, task_id: &str, attempt: u32) -> Result<()> {
        info!(task_id, attempt, "waiting for resource headroom");
        Ok(())
    }

    async fn finish(&self, task_id: &str, log_id: i64, status: &str, output: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET is_running = 0, start_running = NULL, pid = NULL WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        sqlx::query("UPDATE task_log SET end_time = ?, status = ?, output = ? WHERE id = ?")
            .bind(chrono::Utc::now())
            .bind(status)
            .bind(output)
            .bind(log_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    async fn mark_failed_without_running(&self, task_id: &str, reason: &str) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query("INSERT INTO task_log (task_id, start_time, end_time, status, output) VALUES (?, ?, ?, 'failed', ?)")
            .bind(task_id)
            .bind(now)
            .bind(now)
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

/// Resource-gated child-process execution (C10).
pub struct ScriptAdapter {
    config: ScriptRunnerConfig,
    tasks: TaskSchedulerStore,
    rate_limiter: RedisRateLimiter,
    rate_limit: RateLimitConfig,
}

impl ScriptAdapter {
    pub async fn new(
        config: ScriptRunnerConfig,
        rate_limiter: RedisRateLimiter,
        rate_limit: RateLimitConfig,
    ) -> Result<Self> {
        let tasks = TaskSchedulerStore::open(&config.task_scheduler_db_path).await?;
        Ok(Self { config, tasks, rate_limiter, rate_limit })
    }

    /// Run `script_name` (resolved under `scripts_dir` unless absolute)
    /// under `task_id`, gated by host CPU/memory headroom and, before the
    /// process is spawned, by the shared token bucket (§4.5) so a burst of
    /// cron jobs can't hammer whatever external provider the script calls.
    pub async fn run(&self, task_id: &str, script_name: &str) -> Result<ScriptRunResult> {
        let allowed = self
            .rate_limiter
            .check(
                "script-runner",
                self.rate_limit.max_tokens,
                self.rate_limit.refill_rate,
                self.rate_limit.key_expiry(),
            )
            .await
            .map_err(Error::from)?;

        if !allowed {
            return Err(Error::transient("rate limit exceeded, retry after a short delay"));
        }

        self.wait_for_resources(task_id).await?;

        let script_path = if std::path::Path::new(script_name).is_absolute() {
            script_name.to_string()
        } else {
            format!("{}/{}", self.config.scripts_dir, script_name)
        };

        let mut command = if script_path.ends_with(".js") {
            let mut cmd = Command::new("node");
            cmd.arg(&script_path);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&script_path);
            cmd
        };

        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| Error::fatal(e.to_string()))?;
        let pid = child.id();
        let log_id = self.tasks.mark_running(task_id, pid).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let Some(out) = child.stdout.take() {
            read_bounded(out, &mut stdout).await;
        }
        if let Some(err) = child.stderr.take() {
            read_bounded(err, &mut stderr).await;
        }

        let status = child.wait().await.map_err(|e| Error::fatal(e.to_string()))?;
        let exit_code = status.code().unwrap_or(-1);

        let result = ScriptRunResult {
            exit_code,
            output: stdout,
            error: stderr,
        };

        let log_status = if exit_code == 0 { "success" } else { "failed" };
        self.tasks
            .finish(task_id, log_id, log_status, &result.output)
            .await?;

        Ok(result)
    }

    async fn wait_for_resources(&self, task_id: &str) -> Result<()> {
        let mut system = System::new_all();

        for attempt in 1..=self.config.resource_check_retries {
            system.refresh_cpu();
            system.refresh_memory();

            let cpu_pct = system.global_cpu_info().cpu_usage() as f64;
            let mem_pct = if system.total_memory() == 0 {
                0.0
            } else {
                (system.used_memory() as f64 / system.total_memory() as f64) * 100.0
            };

            if cpu_pct <= self.config.cpu_threshold_pct && mem_pct <= self.config.mem_threshold_pct {
                return Ok(());
            }

            warn!(task_id, cpu_pct, mem_pct, attempt, "resource headroom unavailable, waiting");
            self.tasks.log_waiting(task_id, attempt).await?;
            tokio::time::sleep(self.config.resource_check_interval()).await;
        }

        self.tasks
            .mark_failed_without_running(task_id, "resource headroom never became available")
            .await?;

        Err(Error::resource_exhaustion(format!(
            "could not acquire CPU/memory headroom for task {} within {} attempts",
            task_id, self.config.resource_check_retries
        )))
    }
}

/// Drains `reader` to EOF, capping what's kept at `OUTPUT_BUFFER_LIMIT_BYTES`.
/// Bytes past the cap are still read off the pipe (so the child never
/// blocks on a full pipe buffer) but discarded.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(reader: R, into: &mut String) {
    let mut buf_reader = BufReader::new(reader);
    let mut chunk = [0u8; 8192];
    let mut bytes = Vec::new();

    loop {
        match buf_reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if bytes.len() < OUTPUT_BUFFER_LIMIT_BYTES {
                    let take = (OUTPUT_BUFFER_LIMIT_BYTES - bytes.len()).min(n);
                    bytes.extend_from_slice(&chunk[..take]);
                }
            }
            Err(_) => break,
        }
    }

    into.push_str(&String::from_utf8_lossy(&bytes));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{RedisConfig, RedisPool};

    fn test_config() -> ScriptRunnerConfig {
        let dir = std::env::temp_dir();
        ScriptRunnerConfig {
            scripts_dir: dir.to_string_lossy().to_string(),
            task_scheduler_db_path: dir
                .join(format!("jobforge-scripts-test-{}.db", std::process::id()))
                .to_string_lossy()
                .to_string(),
            cpu_threshold_pct: 100.0,
            mem_threshold_pct: 100.0,
            resource_check_interval_ms: 10,
            resource_check_retries: 1,
        }
    }

    /// Builds an adapter against a real Redis instance. Returns `None`
    /// when Redis isn't reachable so these tests no-op in environments
    /// without one, matching `rate_limit`'s own test style.
    async fn test_adapter(config: ScriptRunnerConfig) -> Option<ScriptAdapter> {
        let redis_config = RedisConfig::default();
        let pool = RedisPool::new(redis_config.clone()).await.ok()?;
        let rate_limiter = RedisRateLimiter::new(pool, redis_config).await.ok()?;
        ScriptAdapter::new(config, rate_limiter, RateLimitConfig::default())
            .await
            .ok()
    }

    #[tokio::test]
    async fn runs_a_shell_command_to_completion() {
        let config = test_config();
        let db_path = config.task_scheduler_db_path.clone();
        let Some(adapter) = test_adapter(config).await else { return };

        let result = adapter.run("task-1", "echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("hello"));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let config = test_config();
        let db_path = config.task_scheduler_db_path.clone();
        let Some(adapter) = test_adapter(config).await else { return };

        let result = adapter.run("task-2", "exit 3").await.unwrap();
        assert_eq!(result.exit_code, 3);

        let _ = std::fs::remove_file(&db_path);
    }
}
