//! Core data types and error definitions for the split task queue.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Message recorded on tasks cancelled before reaching a terminal state.
pub const CANCELLED_MESSAGE: &str = "task was cancelled";
/// Message recorded on in-flight tasks failed during startup recovery.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

/// Highest progress value a task may report before it is marked completed.
const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

/// Page range that becomes one output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChapterSpec {
    /// Human readable chapter title, used to name the artifact.
    pub title: String,
    /// First page of the chapter (1-based, inclusive).
    pub start_page: u32,
    /// Last page of the chapter (1-based, inclusive).
    pub end_page: u32,
}

impl ChapterSpec {
    /// Build a chapter descriptor.
    pub fn new(title: impl Into<String>, start_page: u32, end_page: u32) -> Self {
        Self {
            title: title.into(),
            start_page,
            end_page,
        }
    }
}

/// Reject empty chapter lists and malformed page ranges.
pub fn validate_chapters(chapters: &[ChapterSpec]) -> Result<(), TaskError> {
    if chapters.is_empty() {
        return Err(TaskError::InvalidInput(
            "at least one chapter is required".into(),
        ));
    }

    for (index, chapter) in chapters.iter().enumerate() {
        if chapter.start_page == 0 {
            return Err(TaskError::InvalidInput(format!(
                "chapter {} ('{}') must start at page 1 or later",
                index + 1,
                chapter.title
            )));
        }
        if chapter.end_page < chapter.start_page {
            return Err(TaskError::InvalidInput(format!(
                "chapter {} ('{}') ends on page {} before it starts on page {}",
                index + 1,
                chapter.title,
                chapter.end_page,
                chapter.start_page
            )));
        }
    }

    Ok(())
}

/// Lifecycle states of a split task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted and waiting for a worker.
    Pending,
    /// Claimed by a worker; the split engine is running.
    Processing,
    /// Every chapter artifact was produced.
    Completed,
    /// The split failed or the task was cancelled.
    Failed,
}

impl TaskStatus {
    /// Stable lowercase representation used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the task can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the task is waiting for or occupying a worker.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// Durable record of one split job.
///
/// The record doubles as the on-disk snapshot format: one pretty-printed JSON document per task
/// with RFC 3339 timestamps. State changes go through the transition methods below, which refuse
/// to move a task out of a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier.
    pub task_id: String,
    /// Identifier of the uploaded source document.
    pub file_id: String,
    /// Requested chapters, in output order.
    pub chapters: Vec<ChapterSpec>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Completion percentage (0-100).
    pub progress: u8,
    /// Failure description, present only on failed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Timestamp of the transition into a terminal state.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
    /// Artifact filenames, one per chapter, populated only on completion.
    #[serde(default)]
    pub download_links: Vec<String>,
}

impl TaskRecord {
    pub(crate) fn new_pending(
        task_id: String,
        file_id: String,
        chapters: Vec<ChapterSpec>,
    ) -> Self {
        Self {
            task_id,
            file_id,
            chapters,
            status: TaskStatus::Pending,
            progress: 0,
            error_message: None,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            download_links: Vec::new(),
        }
    }

    /// Whether the task reached `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Pending -> Processing`, resetting progress.
    pub(crate) fn start_processing(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Processing;
        self.progress = 0;
        true
    }

    /// Record a progress report; only increases are applied and 100 is reserved for completion.
    pub(crate) fn apply_progress(&mut self, percent: u8) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        let clamped = percent.min(MAX_IN_FLIGHT_PROGRESS);
        if clamped <= self.progress {
            return false;
        }
        self.progress = clamped;
        true
    }

    /// `Processing -> Completed`.
    pub(crate) fn complete(&mut self, download_links: Vec<String>) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.download_links = download_links;
        true
    }

    /// Any non-terminal state -> `Failed`.
    pub(crate) fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.download_links.clear();
        true
    }

    /// `Processing -> Pending` for tasks interrupted by a restart.
    pub(crate) fn requeue(&mut self) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.progress = 0;
        true
    }

    /// Terminal tasks whose completion time is strictly older than `cutoff`.
    pub(crate) fn expired_before(&self, cutoff: OffsetDateTime) -> bool {
        self.is_terminal()
            && self
                .completed_at
                .is_some_and(|completed_at| completed_at < cutoff)
    }
}

/// What startup recovery does with tasks a previous process left in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Reset interrupted tasks to pending and run them again.
    #[default]
    Requeue,
    /// Mark interrupted tasks as failed.
    Fail,
}

impl RecoveryPolicy {
    /// Lowercase label used in configuration and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requeue => "requeue",
            Self::Fail => "fail",
        }
    }
}

impl std::str::FromStr for RecoveryPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "requeue" => Ok(Self::Requeue),
            "fail" => Ok(Self::Fail),
            _ => Err(()),
        }
    }
}

/// Runtime parameters of the task queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Directory holding one JSON snapshot per task.
    pub tasks_dir: PathBuf,
    /// Handling of tasks left in flight by a previous process.
    pub recovery: RecoveryPolicy,
    /// How long shutdown waits for busy workers before aborting them.
    pub shutdown_grace: Duration,
}

/// Per-status task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    /// Tasks waiting for a worker.
    pub pending: usize,
    /// Tasks currently being split.
    pub processing: usize,
    /// Tasks that finished successfully.
    pub completed: usize,
    /// Tasks that failed or were cancelled.
    pub failed: usize,
    /// All tracked tasks.
    pub total: usize,
}

impl TaskCounts {
    pub(crate) fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}

/// Point-in-time view of the queue and worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Task identifiers waiting in the queue.
    pub queue_size: usize,
    /// Worker loops currently alive.
    pub active_workers: usize,
    /// Split executions currently in flight.
    pub processing_tasks: usize,
    /// Per-status counts over every tracked task.
    pub task_counts: TaskCounts,
}

/// Errors raised while writing or reading task snapshots.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned synchronously by the task queue API.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Request failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Referenced task or source file does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: &'static str,
        /// Identifier supplied by the caller.
        id: String,
    },
    /// Operation conflicts with unfinished work.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Queue is shutting down or already stopped.
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),
    /// Persisted state could not be loaded.
    #[error("Task persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl TaskError {
    pub(crate) fn task_not_found(task_id: &str) -> Self {
        Self::NotFound {
            entity: "task",
            id: task_id.to_string(),
        }
    }
}
