//! localist - venue pipeline service
//!
//! Runs the Collector → Reconciler/Scorer → Curator pipeline either as a
//! long-running scheduled service or as one-shot commands.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use localist_common::config::{resolve_root_folder, LocalistConfig, LoggingConfig};
use localist_common::db::init_database;
use localist_common::db::models::BronzeKind;
use localist_pipeline::Coordinator;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for localist
#[derive(Parser, Debug)]
#[command(name = "localist")]
#[command(about = "Venue ingestion, deduplication and ranking pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LOCALIST_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for the database and relative fetcher paths
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start schedules and event triggers; runs until Ctrl-C
    Serve,
    /// Run every stage once in order
    Pipeline,
    /// Run one agent by name (e.g. `reconciler`, `collector:eater`)
    Agent { name: String },
    /// Print agent status and data-quality report as JSON
    Status,
    /// Send a source's errored Bronze records back to reconciliation
    RetryErrors { source: String },
    /// Return one Bronze record to pending (kind: venue, list or review)
    ResetRecord { kind: String, id: String },
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?;

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = LocalistConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging)?;

    info!("Starting localist {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = config.resolve_database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path).await.context("Failed to open database")?;

    let coordinator = Coordinator::from_config(pool, &config, &root_folder)
        .await
        .context("Failed to build coordinator")?;

    match args.command {
        Command::Serve => {
            coordinator.start();
            shutdown_signal().await;
            coordinator.shutdown().await;
        }
        Command::Pipeline => {
            let summary = coordinator.run_full_pipeline().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Agent { name } => {
            let run = coordinator.run_agent(&name).await?;
            match run {
                Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
                None => info!(agent = %name, "Agent did not run (paused or already running)"),
            }
        }
        Command::Status => {
            let report = serde_json::json!({
                "status": coordinator.status().await?,
                "dataQuality": coordinator.data_quality().await?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::RetryErrors { source } => {
            let reset = coordinator.retry_source_errors(&source).await?;
            println!("{}", serde_json::json!({ "source": source, "reset": reset }));
        }
        Command::ResetRecord { kind, id } => {
            let kind = BronzeKind::parse(&kind)?;
            let reset = coordinator.reset_record(kind, &id).await?;
            println!("{}", serde_json::json!({ "id": id, "reset": reset }));
        }
    }

    coordinator.pool().close().await;
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
