use anyhow::{Context, Result};
use chapter_splitter::{
    api::{self, RouterOptions},
    config::{self, Config},
    logging::{self, LogTarget},
    splitter::PdfSplitEngine,
    storage::LocalFileStorage,
    tasks::{SplitTaskApi, TaskOrchestrator},
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// HTTP server for the chapter splitter.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Port to listen on (overrides SERVER_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Root directory for uploads and task snapshots (overrides UPLOAD_DIR).
    #[arg(long)]
    upload_dir: Option<PathBuf>,
    /// Number of concurrent split workers (overrides MAX_CONCURRENT_TASKS).
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config_with(|config| {
        if let Some(port) = cli.port {
            config.server_port = Some(port);
        }
        if let Some(dir) = cli.upload_dir.clone() {
            config.upload_dir = dir;
        }
        if let Some(workers) = cli.workers {
            config.max_concurrent_tasks = workers;
        }
    })
    .context("failed to load configuration")?;
    logging::init_tracing(LogTarget::Stdout);

    let files = Arc::new(LocalFileStorage::new(
        config.upload_dir.clone(),
        config.max_file_size,
    ));
    let orchestrator = Arc::new(TaskOrchestrator::new(
        config.queue_settings(),
        files.clone(),
        Arc::new(PdfSplitEngine::new()),
    ));
    orchestrator
        .start()
        .await
        .context("failed to start task queue")?;

    let sweeper = config
        .cleanup_interval()
        .map(|interval| spawn_sweeper(orchestrator.clone(), interval, config.retention()));

    let app = api::create_router(
        orchestrator.clone(),
        files,
        RouterOptions {
            default_retention: config.retention(),
            max_upload_bytes: config.max_file_size,
        },
    );

    let (listener, port) = bind_listener(config)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    orchestrator.shutdown().await;
    Ok(())
}

fn spawn_sweeper(
    orchestrator: Arc<TaskOrchestrator>,
    interval: std::time::Duration,
    retention: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match orchestrator.cleanup(retention).await {
                Ok(removed) => tracing::debug!(removed, "Retention sweep finished"),
                Err(err) => tracing::warn!(error = %err, "Retention sweep failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn bind_listener(config: &Config) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8080..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8080-8099",
    ))
}
