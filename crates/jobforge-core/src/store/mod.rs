//! SQLite-backed persisted state: the Job Store (C3) and Worker Registry
//! (C4). Both tables live in one primary database, written only from the
//! coordinator process (§5) — workers mutate them exclusively through the
//! coordinator's HTTP API.

pub mod job_store;
pub mod worker_store;

pub use job_store::JobStore;
pub use worker_store::WorkerStore;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::{Error, Result};

/// Open (creating if absent) the primary SQLite database and return a pool.
pub async fn create_pool(path: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = format!("sqlite://{}?mode=rwc", path);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .map_err(Error::Database)?;

    info!(path, "opened primary database");

    Ok(pool)
}

/// Run embedded migrations against the primary database. Idempotent; safe
/// to call on every coordinator boot unless `--skip-migrate` was passed.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;

    info!("migrations applied");
    Ok(())
}
