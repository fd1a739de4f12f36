//! Standalone entry point for the worker runtime. Parses the CLI flags
//! `Supervisor::spawn_child` passes and hands off to [`jobforge_worker`]'s
//! library runtime; `jobforge-cli worker` drives the same runtime in-process.

use clap::Parser;
use tracing::info;

use jobforge_core::models::JobType;
use jobforge_core::{Config, Result};
use jobforge_worker::runtime::{WorkerConfig, WorkerRuntime};

#[derive(Parser, Debug)]
#[command(name = "jobforge-worker")]
#[command(about = "jobforge worker runtime")]
struct Args {
    /// Worker id, assigned by the coordinator's Worker Registry.
    #[arg(long, env = "JOBFORGE_WORKER_ID")]
    worker_id: i64,

    /// Job type this process dispatches. Matches a [`JobType`] variant.
    #[arg(long, env = "JOBFORGE_WORKER_TYPE")]
    worker_type: String,

    /// Path to a TOML config file. Falls back to `Config::from_env`.
    #[arg(long, env = "JOBFORGE_CONFIG")]
    config: Option<String>,

    /// Base URL of the Dispatch Coordinator's HTTP API.
    #[arg(long, env = "JOBFORGE_COORDINATOR_URL", default_value = "http://127.0.0.1:8080")]
    coordinator_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.as_str())
        .init();

    let job_type: JobType = args.worker_type.parse()?;

    info!(worker_id = args.worker_id, job_type = %job_type, "starting worker runtime");

    let mut runtime = WorkerRuntime::new(
        WorkerConfig {
            worker_id: args.worker_id,
            job_type,
            coordinator_url: args.coordinator_url,
        },
        &config,
    )
    .await?;

    runtime.run().await
}
