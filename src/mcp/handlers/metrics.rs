//! Handlers for the metrics and queue-status tools.

use std::sync::Arc;

use crate::mcp::format::{metrics_payload, queue_payload, task_error};
use crate::tasks::SplitTaskApi;
use rmcp::{ErrorData as McpError, model::CallToolResult};

/// Handle the `metrics` tool, returning the current queue counters.
pub(crate) async fn handle_metrics(
    tasks: &Arc<dyn SplitTaskApi>,
) -> Result<CallToolResult, McpError> {
    let snapshot = tasks.metrics_snapshot();
    Ok(CallToolResult::structured(metrics_payload(&snapshot)))
}

/// Handle the `queue-status` tool.
pub(crate) async fn handle_queue_status(
    tasks: &Arc<dyn SplitTaskApi>,
) -> Result<CallToolResult, McpError> {
    let status = tasks.queue_status().await.map_err(task_error)?;
    Ok(CallToolResult::structured(queue_payload(&status)))
}
