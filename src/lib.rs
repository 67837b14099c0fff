#![deny(missing_docs)]

//! Core library for the chapter splitter: a persistent, bounded-concurrency queue that splits
//! uploaded PDFs into per-chapter files.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Model Context Protocol server implementation.
pub mod mcp;
/// Task queue metrics helpers.
pub mod metrics;
/// Split engine abstraction and PDF implementation.
pub mod splitter;
/// Storage for uploads and chapter artifacts.
pub mod storage;
/// Split task records, queue, workers and lifecycle.
pub mod tasks;
