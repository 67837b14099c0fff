//! MCP server entrypoint (stdio transport).
//!
//! Launches an MCP server exposing the chapter splitter's task queue over stdio. Logs go to
//! stderr and the log file because stdout carries the protocol. Configuration is shared with the
//! HTTP binary; both may run against the same upload directory, but only one process should own
//! the task queue at a time.
use anyhow::{Context, Result};
use chapter_splitter::{
    config,
    logging::{self, LogTarget},
    mcp::{SettingsSnapshot, SplitterMcpServer},
    splitter::PdfSplitEngine,
    storage::LocalFileStorage,
    tasks::TaskOrchestrator,
};
use rmcp::{service::ServiceExt, transport::stdio};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::init_config().context("failed to load configuration")?;
    logging::init_tracing(LogTarget::Stderr);

    let files = Arc::new(LocalFileStorage::new(
        config.upload_dir.clone(),
        config.max_file_size,
    ));
    let orchestrator = Arc::new(TaskOrchestrator::new(
        config.queue_settings(),
        files,
        Arc::new(PdfSplitEngine::new()),
    ));
    orchestrator
        .start()
        .await
        .context("failed to start task queue")?;

    let settings = SettingsSnapshot {
        workers: config.max_concurrent_tasks,
        retention_hours: config.task_retention_hours,
        max_file_size: config.max_file_size,
        recovery_policy: config.recovery_policy.as_str().to_string(),
        shutdown_grace_seconds: config.shutdown_grace_seconds,
    };
    let server = SplitterMcpServer::new(orchestrator.clone(), settings);

    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server over stdio")?;

    let outcome = service.waiting().await;
    orchestrator.shutdown().await;
    outcome.context("MCP server terminated unexpectedly")?;

    Ok(())
}
