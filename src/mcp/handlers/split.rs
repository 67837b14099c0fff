//! MCP handler queueing split tasks.

use std::sync::Arc;

use crate::mcp::format::{task_error, task_payload};
use crate::tasks::{ChapterSpec, SplitTaskApi};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, JsonObject},
};
use serde::Deserialize;

use super::parse_arguments;

/// Request payload accepted by the `split-pdf` tool.
#[derive(Debug, Deserialize)]
pub(crate) struct SplitToolRequest {
    /// Identifier of an uploaded PDF.
    pub(crate) file_id: String,
    /// Chapters to extract, in output order.
    pub(crate) chapters: Vec<ChapterSpec>,
}

/// Handle the `split-pdf` tool by validating and enqueueing a split task.
pub(crate) async fn handle_split(
    tasks: &Arc<dyn SplitTaskApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: SplitToolRequest = parse_arguments(arguments)?;
    if args.file_id.trim().is_empty() {
        return Err(McpError::invalid_params("`file_id` must not be empty", None));
    }

    let record = tasks
        .create_task(&args.file_id, args.chapters)
        .await
        .map_err(task_error)?;

    Ok(CallToolResult::structured(task_payload(&record)))
}
