//! Model Context Protocol (MCP) integration for the chapter splitter.
//!
//! This module wires the split task queue into an MCP server so editors and agent hosts can
//! queue and monitor chapter splits over stdio. The surface area consists of:
//!
//! - Tools: `split-pdf`, `task-status`, `list-tasks`, `queue-status`, `cancel-task`,
//!   `cleanup-tasks`, and `metrics`.
//! - Resources: `mcp://queue` and `mcp://settings`.
//!
//! Handlers, schemas, and formatting helpers are kept in focused submodules to make tests and
//! reviews small and targeted.

mod format;
pub mod handlers;
mod registry;
mod schemas;
mod server;

pub use format::SettingsSnapshot;
pub use server::SplitterMcpServer;
