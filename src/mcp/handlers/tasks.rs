//! MCP handlers for inspecting, cancelling and cleaning up tasks.

use std::sync::Arc;
use std::time::Duration;

use crate::mcp::format::{task_error, task_payload};
use crate::tasks::SplitTaskApi;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, JsonObject},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_arguments;

#[derive(Debug, Deserialize)]
struct TaskIdRequest {
    task_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListTasksRequest {
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    active_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CleanupRequest {
    #[serde(default)]
    max_age_hours: Option<u64>,
}

/// Handle `task-status`.
pub(crate) async fn handle_task_status(
    tasks: &Arc<dyn SplitTaskApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: TaskIdRequest = parse_arguments(arguments)?;
    let record = tasks.get_task(&args.task_id).await.map_err(task_error)?;
    Ok(CallToolResult::structured(task_payload(&record)))
}

/// Handle `list-tasks`.
pub(crate) async fn handle_list_tasks(
    tasks: &Arc<dyn SplitTaskApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: ListTasksRequest = parse_arguments(arguments)?;
    let records = if args.active_only {
        let mut active = tasks.list_active_tasks().await.map_err(task_error)?;
        if let Some(file_id) = args.file_id.as_deref() {
            active.retain(|record| record.file_id == file_id);
        }
        active
    } else {
        tasks
            .list_tasks(args.file_id.as_deref())
            .await
            .map_err(task_error)?
    };

    let payload: Vec<Value> = records.iter().map(task_payload).collect();
    Ok(CallToolResult::structured(json!({
        "count": payload.len(),
        "tasks": payload,
    })))
}

/// Handle `cancel-task`.
pub(crate) async fn handle_cancel(
    tasks: &Arc<dyn SplitTaskApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: TaskIdRequest = parse_arguments(arguments)?;
    let cancelled = tasks.cancel_task(&args.task_id).await.map_err(task_error)?;
    Ok(CallToolResult::structured(json!({
        "taskId": args.task_id,
        "cancelled": cancelled,
    })))
}

/// Handle `cleanup-tasks`, falling back to the configured retention window.
pub(crate) async fn handle_cleanup(
    tasks: &Arc<dyn SplitTaskApi>,
    arguments: Option<JsonObject>,
    default_retention_hours: u64,
) -> Result<CallToolResult, McpError> {
    let args: CleanupRequest = parse_arguments(arguments)?;
    let hours = args.max_age_hours.unwrap_or(default_retention_hours);
    let removed = tasks
        .cleanup(Duration::from_secs(hours.saturating_mul(3600)))
        .await
        .map_err(task_error)?;
    Ok(CallToolResult::structured(json!({
        "removed": removed,
        "maxAgeHours": hours,
    })))
}
