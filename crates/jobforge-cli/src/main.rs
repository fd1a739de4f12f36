use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use jobforge_core::models::JobType;
use jobforge_core::{store, Config, Result};
use jobforge_worker::runtime::{WorkerConfig, WorkerRuntime};

#[derive(Parser)]
#[command(name = "jobforge")]
#[command(about = "jobforge job queue — coordinator, worker, and ops commands")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Dispatch Coordinator
    Server {
        #[arg(short = 'H', long, help = "Bind address")]
        host: Option<String>,

        #[arg(short = 'P', long, help = "Port number")]
        port: Option<u16>,

        #[arg(long, help = "Skip automatic database migration on startup")]
        skip_migrate: bool,
    },

    /// Run a single worker runtime in the foreground
    Worker {
        #[arg(long, help = "Worker id, assigned by the coordinator's Worker Registry")]
        worker_id: i64,

        #[arg(long, help = "Job type this process dispatches")]
        worker_type: String,

        #[arg(long, default_value = "http://127.0.0.1:8080", help = "Coordinator API base URL")]
        coordinator_url: String,
    },

    /// Run database migrations
    Migrate,

    /// Show the effective configuration
    Config {
        #[arg(long, help = "Validate configuration and exit with a non-zero status on failure")]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = match &cli.config {
        Some(path) => Config::load(path.to_str().unwrap())?,
        None => Config::from_env()?,
    };

    info!("jobforge v{}", jobforge_core::VERSION);

    match cli.command {
        Commands::Server { host, port, skip_migrate } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            if !skip_migrate {
                info!("running database migrations");
                match run_migrations(&config).await {
                    Ok(_) => info!("database migrations completed successfully"),
                    Err(e) => {
                        eprintln!("{}", format!("\u{274c} database migration failed: {}", e).red());
                        eprintln!("use --skip-migrate to start without migration");
                        std::process::exit(1);
                    }
                }
            }

            jobforge_api::run(config).await?;
        }

        Commands::Worker { worker_id, worker_type, coordinator_url } => {
            let job_type: JobType = worker_type.parse()?;
            let mut runtime = WorkerRuntime::new(
                WorkerConfig { worker_id, job_type, coordinator_url },
                &config,
            )
            .await?;
            runtime.run().await?;
        }

        Commands::Migrate => {
            println!("{}", "running database migrations...".yellow());
            match run_migrations(&config).await {
                Ok(_) => println!("{}", "\u{2705} migrations completed successfully".green()),
                Err(e) => {
                    eprintln!("{}", format!("\u{274c} migration failed: {}", e).red());
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { validate } => {
            if validate {
                match config.validate() {
                    Ok(_) => println!("{}", "\u{2705} configuration is valid".green()),
                    Err(e) => {
                        eprintln!("{}", format!("\u{274c} invalid configuration: {}", e).red());
                        std::process::exit(1);
                    }
                }
            } else {
                println!(
                    "configuration loaded from: {}",
                    cli.config
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "environment".to_string())
                );
                println!("{:#?}", config);
            }
        }
    }

    Ok(())
}

async fn run_migrations(config: &Config) -> Result<()> {
    let pool = store::create_pool(&config.database.path, config.database.pool_size).await?;
    store::migrate(&pool).await?;
    Ok(())
}
