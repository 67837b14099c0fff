//! Formatting helpers shared across MCP handlers and resources.

use crate::metrics::MetricsSnapshot;
use crate::tasks::{QueueStatus, TaskError, TaskRecord};
use rmcp::{ErrorData as McpError, model::ResourceContents};
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub(crate) const APPLICATION_JSON: &str = "application/json";

/// Render a task record for tool responses.
pub(crate) fn task_payload(record: &TaskRecord) -> Value {
    let chapters: Vec<Value> = record
        .chapters
        .iter()
        .map(|chapter| {
            json!({
                "title": chapter.title,
                "startPage": chapter.start_page,
                "endPage": chapter.end_page,
            })
        })
        .collect();

    json!({
        "taskId": record.task_id,
        "fileId": record.file_id,
        "status": record.status.as_str(),
        "progress": record.progress,
        "errorMessage": record.error_message,
        "createdAt": format_timestamp(record.created_at),
        "completedAt": record.completed_at.map(format_timestamp),
        "chapters": chapters,
        "downloadLinks": record.download_links,
    })
}

/// Render queue status for tool responses and the queue resource.
pub(crate) fn queue_payload(status: &QueueStatus) -> Value {
    json!({
        "queueSize": status.queue_size,
        "activeWorkers": status.active_workers,
        "processingTasks": status.processing_tasks,
        "taskCounts": {
            "pending": status.task_counts.pending,
            "processing": status.task_counts.processing,
            "completed": status.task_counts.completed,
            "failed": status.task_counts.failed,
            "total": status.task_counts.total,
        },
    })
}

/// Render the metrics counters for the `metrics` tool.
pub(crate) fn metrics_payload(snapshot: &MetricsSnapshot) -> Value {
    json!({
        "tasksCreated": snapshot.tasks_created,
        "tasksCompleted": snapshot.tasks_completed,
        "tasksFailed": snapshot.tasks_failed,
        "tasksCancelled": snapshot.tasks_cancelled,
        "progressWrites": snapshot.progress_writes,
        "persistenceFailures": snapshot.persistence_failures,
    })
}

fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

/// Map queue errors onto MCP error codes.
pub(crate) fn task_error(err: TaskError) -> McpError {
    match err {
        TaskError::InvalidInput(_) | TaskError::NotFound { .. } | TaskError::Conflict(_) => {
            McpError::invalid_params(err.to_string(), None)
        }
        TaskError::Unavailable(_) | TaskError::Persistence(_) => {
            McpError::internal_error(err.to_string(), None)
        }
    }
}

/// Serialize a value to JSON, falling back to compact formatting on error.
pub(crate) fn serialize_json<T: Serialize>(value: &T, context_uri: &str) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|error| {
        tracing::warn!(uri = context_uri, %error, "Failed to serialize JSON prettily");
        serde_json::to_string(value).unwrap_or_else(|_| "{}".into())
    })
}

/// Build JSON resource contents for MCP resource responses.
pub(crate) fn json_resource_contents(uri: &str, text: String) -> ResourceContents {
    ResourceContents::TextResourceContents {
        uri: uri.to_string(),
        mime_type: Some(APPLICATION_JSON.into()),
        text,
        meta: None,
    }
}

/// Effective queue settings exposed through the `settings` resource.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SettingsSnapshot {
    /// Number of concurrent split workers.
    pub workers: usize,
    /// Default retention window for finished tasks, in hours.
    pub retention_hours: u64,
    /// Largest accepted upload in bytes.
    pub max_file_size: usize,
    /// Handling of tasks interrupted by a restart (`requeue` or `fail`).
    pub recovery_policy: String,
    /// Grace period granted to busy workers during shutdown, in seconds.
    pub shutdown_grace_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{ChapterSpec, TaskStatus};

    #[test]
    fn task_payload_uses_camel_case_and_rfc3339() {
        let record = TaskRecord {
            task_id: "t-1".into(),
            file_id: "f-1".into(),
            chapters: vec![ChapterSpec::new("Intro", 1, 4)],
            status: TaskStatus::Completed,
            progress: 100,
            error_message: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            completed_at: Some(OffsetDateTime::UNIX_EPOCH),
            download_links: vec!["01_Intro.pdf".into()],
        };

        let payload = task_payload(&record);
        assert_eq!(payload["taskId"], "t-1");
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["createdAt"], "1970-01-01T00:00:00Z");
        assert_eq!(payload["chapters"][0]["endPage"], 4);
        assert_eq!(payload["downloadLinks"][0], "01_Intro.pdf");
    }

    #[test]
    fn not_found_maps_to_invalid_params() {
        let err = task_error(TaskError::NotFound {
            entity: "task",
            id: "x".into(),
        });
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
        let err = task_error(TaskError::Unavailable("stopped".into()));
        assert_eq!(err.code, rmcp::model::ErrorCode::INTERNAL_ERROR);
    }
}
