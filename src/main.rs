//! Pocketstream - Durable single-node PocketBase with Garage and Litestream
//!
//! Container entrypoint: provisions the storage node, keeps the database
//! replicated and fronts the application server with a write gate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pocketstream::api::{AppState, CheckpointResponse, HttpServer};
use pocketstream::app::AppServer;
use pocketstream::config::PocketstreamConfig;
use pocketstream::error::{Error, Result};
use pocketstream::garage::{BootstrapOutcome, Bootstrapper};
use pocketstream::health::ReplicationMonitor;
use pocketstream::litestream::{LitestreamFile, ReplicationSupervisor};
use pocketstream::process::{BackgroundProcess, ProcessRunner, SystemRunner};
use pocketstream::sqlite;

/// Pocketstream - Durable single-node PocketBase with Garage and Litestream
#[derive(Parser)]
#[command(name = "pocketstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional TOML configuration file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides LOG_LEVEL
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the local Garage node once, then run `garage server`
    Garage,

    /// Write the Litestream config and run the application under `litestream replicate`
    Litestream,

    /// Restore the database if missing, then run the application server
    Restore,

    /// Supervise replication and serve the write-gated gateway
    Serve,

    /// Checkpoint the database WAL once
    Checkpoint,

    /// Run the replication health check once (exit status 1 when unhealthy)
    Health,

    /// Validate and print the effective configuration with secrets masked
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let loaded = PocketstreamConfig::load(cli.config.as_deref());

    let (level, format) = match &loaded {
        Ok(config) => (
            cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone()),
            config.logging.format.clone(),
        ),
        Err(_) => (
            cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
            "pretty".to_string(),
        ),
    };
    init_logging(&level, &format);

    let result = match loaded {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(command: Commands, config: PocketstreamConfig) -> Result<()> {
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new(config.garage.stop_grace()));

    match command {
        Commands::Garage => run_garage(&config, runner.as_ref()).await,
        Commands::Litestream => run_litestream(&config, runner).await,
        Commands::Restore => run_restore(&config, runner).await,
        Commands::Serve => run_serve(&config, runner).await,
        Commands::Checkpoint => run_checkpoint(&config).await,
        Commands::Health => run_health(&config, runner).await,
        Commands::Validate => run_validate(&config),
    }
}

/// Bootstrap garage if needed and hand off to the server
async fn run_garage(config: &PocketstreamConfig, runner: &dyn ProcessRunner) -> Result<()> {
    let bootstrapper = Bootstrapper::new(&config.garage, runner);

    if let BootstrapOutcome::Completed(report) = bootstrapper.run().await? {
        tracing::info!(
            node_id = %report.node_id,
            layout_applied = report.layout_applied,
            key_imported = report.key_imported,
            buckets_created = ?report.buckets_created,
            "Garage bootstrap finished"
        );
    }

    Err(bootstrapper.handoff())
}

/// Config, restore, then let litestream own the application server
async fn run_litestream(config: &PocketstreamConfig, runner: Arc<dyn ProcessRunner>) -> Result<()> {
    let supervisor = ReplicationSupervisor::new(&config.litestream, Arc::clone(&runner));
    supervisor.synthesize_config()?;
    supervisor.restore_if_missing().await;

    let app = AppServer::new(&config.app, runner);
    app.upsert_superuser().await;

    let child = app.serve_command_line(&config.api.bind_address);
    Err(supervisor.replicate_and_exec(&child))
}

/// Restore the database if missing, then hand off to the application server
async fn run_restore(config: &PocketstreamConfig, runner: Arc<dyn ProcessRunner>) -> Result<()> {
    let supervisor = ReplicationSupervisor::new(&config.litestream, Arc::clone(&runner));
    supervisor.synthesize_config()?;
    supervisor.restore_if_missing().await;
    supervisor.check_integrity().await;

    let app = AppServer::new(&config.app, runner);
    app.upsert_superuser().await;
    Err(app.exec_serve(&config.api.bind_address))
}

/// Replication supervisor, application server and gateway in one process
async fn run_serve(config: &PocketstreamConfig, runner: Arc<dyn ProcessRunner>) -> Result<()> {
    tracing::info!("Starting pocketstream gateway...");

    let supervisor = ReplicationSupervisor::new(&config.litestream, Arc::clone(&runner));
    let replicator = supervisor.start().await?;
    let monitor = Arc::new(
        ReplicationMonitor::new(&config.litestream, Arc::clone(&runner))
            .with_replicator(Arc::clone(&replicator)),
    );

    let app = AppServer::new(&config.app, Arc::clone(&runner));
    let mut app_process = match app.start().await {
        Ok(process) => process,
        Err(e) => {
            stop(&mut **replicator.lock().await).await;
            return Err(e);
        }
    };
    app.upsert_superuser().await;

    monitor.check().await;
    let tasks = supervisor.spawn_steady_state(Arc::clone(&monitor));

    let server = HttpServer::new(
        config.api.clone(),
        AppState::new(
            Arc::clone(&monitor),
            config.litestream.db_path.clone(),
            &config.app.http_address,
        ),
    );

    let app_label = app_process.label().to_string();
    let result = tokio::select! {
        result = server.start(shutdown_signal()) => result,
        exit = app_process.wait() => match exit {
            Ok(report) => Err(Error::CommandFailed {
                command: app_label,
                reason: format!("application server exited ({})", report),
            }),
            Err(e) => Err(e),
        },
    };

    tracing::info!("Shutting down...");
    tasks.abort();
    stop(app_process.as_mut()).await;
    stop(&mut **replicator.lock().await).await;

    result
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Received shutdown signal");
}

async fn stop(process: &mut dyn BackgroundProcess) {
    match process.terminate().await {
        Ok(report) => tracing::info!("Stopped {} ({})", process.label(), report),
        Err(e) => tracing::warn!("Failed to stop {}: {}", process.label(), e),
    }
}

/// One-shot WAL checkpoint
async fn run_checkpoint(config: &PocketstreamConfig) -> Result<()> {
    let result = sqlite::checkpoint_async(config.litestream.db_path.clone()).await?;
    let response = CheckpointResponse {
        status: "checkpoint completed".to_string(),
        result,
    };
    println!("{}", to_json(&response)?);
    Ok(())
}

/// One-shot replication health check
async fn run_health(config: &PocketstreamConfig, runner: Arc<dyn ProcessRunner>) -> Result<()> {
    let monitor = ReplicationMonitor::new(&config.litestream, runner);
    let snapshot = monitor.check().await;
    println!("{}", to_json(&snapshot)?);

    if snapshot.healthy {
        Ok(())
    } else {
        Err(Error::Replication("replication is unhealthy".to_string()))
    }
}

/// Validate configuration
fn run_validate(config: &PocketstreamConfig) -> Result<()> {
    if !config.litestream.config_path.exists() {
        LitestreamFile::from_config(&config.litestream)?;
    }
    if !config.garage.marker_path.exists() {
        if let Err(e) = config.garage.validate() {
            tracing::warn!("Garage bootstrap settings incomplete: {}", e);
        }
    }

    let rendered = toml::to_string_pretty(&config.redacted())
        .map_err(|e| Error::Internal(format!("cannot render configuration: {}", e)))?;
    println!("{}", rendered);
    println!("✓ Configuration is valid");
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Internal(e.to_string()))
}
