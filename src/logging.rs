//! Tracing configuration and log routing.
//!
//! Console output uses a compact formatter on stdout, or on stderr for the MCP binary whose
//! stdout carries the protocol. Logs are also appended to `CHAPTER_SPLITTER_LOG_FILE` when set,
//! otherwise to `logs/chapter-splitter.log`, through a non-blocking writer.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_ENV: &str = "CHAPTER_SPLITTER_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "chapter-splitter.log";

/// Console stream receiving human-readable logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard output, for the HTTP server.
    Stdout,
    /// Standard error, for stdio transports.
    Stderr,
}

impl LogTarget {
    fn writer(self) -> BoxMakeWriter {
        match self {
            Self::Stdout => BoxMakeWriter::new(std::io::stdout),
            Self::Stderr => BoxMakeWriter::new(std::io::stderr),
        }
    }
}

/// Configure console and file subscribers.
///
/// Respects `RUST_LOG` for filtering and defaults to `info`. Calling this twice is harmless; the
/// second installation attempt is ignored.
pub fn init_tracing(target: LogTarget) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(target.writer())
        .with_target(false)
        .with_ansi(target == LogTarget::Stdout)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let result = if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).try_init()
    } else {
        registry.try_init()
    };

    if let Err(err) = result {
        eprintln!("Tracing already initialised: {err}");
    }
}

/// Build a non-blocking writer for file logging, or `None` when the target cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    if let Some(path) = std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        return match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => Some(install_writer(file)),
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        };
    }

    if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
        eprintln!("Failed to create logs directory: {err}");
        return None;
    }
    let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
    Some(install_writer(appender))
}

fn install_writer<W>(writer: W) -> NonBlocking
where
    W: std::io::Write + Send + 'static,
{
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    let _ = LOG_GUARD.set(guard);
    non_blocking
}
