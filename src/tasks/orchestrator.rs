//! Lifecycle management for the split task queue.

use crate::metrics::{MetricsSnapshot, QueueMetrics};
use crate::splitter::SplitEngine;
use crate::storage::{FileStorage, StorageError};
use crate::tasks::progress::CancellationRegistry;
use crate::tasks::queue::WorkQueue;
use crate::tasks::store::TaskStore;
use crate::tasks::types::{
    CANCELLED_MESSAGE, ChapterSpec, INTERRUPTED_MESSAGE, PersistenceError, QueueSettings,
    QueueStatus, RecoveryPolicy, TaskError, TaskRecord, TaskStatus, validate_chapters,
};
use crate::tasks::worker::{WorkerContext, discard_output, run_worker};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Orchestrator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed; snapshots not loaded yet.
    NotStarted,
    /// Workers are consuming the queue.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Workers exited; new tasks are refused.
    Stopped,
}

/// Operations exposed to the HTTP and MCP surfaces.
#[async_trait]
pub trait SplitTaskApi: Send + Sync {
    /// Validate and enqueue a split of `file_id` into `chapters`.
    async fn create_task(
        &self,
        file_id: &str,
        chapters: Vec<ChapterSpec>,
    ) -> Result<TaskRecord, TaskError>;
    /// Fetch one task.
    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, TaskError>;
    /// List tasks newest first, optionally for one file.
    async fn list_tasks(&self, file_id: Option<&str>) -> Result<Vec<TaskRecord>, TaskError>;
    /// Pending and processing tasks, oldest first.
    async fn list_active_tasks(&self) -> Result<Vec<TaskRecord>, TaskError>;
    /// Queue depth, worker activity and per-status counts.
    async fn queue_status(&self) -> Result<QueueStatus, TaskError>;
    /// Cancel a non-terminal task; `false` when unknown or already finished.
    async fn cancel_task(&self, task_id: &str) -> Result<bool, TaskError>;
    /// Delete terminal tasks that finished more than `retention` ago, with their artifacts.
    async fn cleanup(&self, retention: Duration) -> Result<usize, TaskError>;
    /// Delete an uploaded file and its finished tasks; refused while any of its tasks is
    /// pending or processing. Returns the number of task records removed.
    async fn delete_file(&self, file_id: &str) -> Result<usize, TaskError>;
    /// Counter snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Persistent, bounded-concurrency queue of split tasks.
///
/// Owns the task store, the work queue and a fixed pool of workers. Starting is idempotent and
/// happens implicitly on first use; it reloads snapshots from disk and re-enqueues unfinished
/// work according to the configured [`RecoveryPolicy`].
pub struct TaskOrchestrator {
    settings: QueueSettings,
    ctx: Arc<WorkerContext>,
    state: Mutex<LifecycleState>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    /// Build an orchestrator; no I/O happens until [`TaskOrchestrator::start`].
    pub fn new(
        settings: QueueSettings,
        files: Arc<dyn FileStorage>,
        engine: Arc<dyn SplitEngine>,
    ) -> Self {
        let metrics = Arc::new(QueueMetrics::new());
        let store = Arc::new(TaskStore::new(
            settings.tasks_dir.clone(),
            Arc::clone(&metrics),
        ));
        let ctx = Arc::new(WorkerContext {
            store,
            queue: Arc::new(WorkQueue::new()),
            files,
            engine,
            cancellations: Arc::new(CancellationRegistry::new()),
            metrics,
            active_workers: AtomicUsize::new(0),
        });

        Self {
            settings,
            ctx,
            state: Mutex::new(LifecycleState::NotStarted),
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Load persisted tasks, recover interrupted ones and spawn the workers.
    pub async fn start(&self) -> Result<(), TaskError> {
        let mut workers = self.workers.lock().await;
        match self.state() {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Stopping | LifecycleState::Stopped => {
                return Err(TaskError::Unavailable("task queue has been shut down".into()));
            }
            LifecycleState::NotStarted => {}
        }

        let requeued = self.recover().await?;

        let count = self.settings.workers.max(1);
        for index in 0..count {
            let name = format!("split-worker-{index}");
            workers.push(tokio::spawn(run_worker(name, Arc::clone(&self.ctx))));
        }
        self.set_state(LifecycleState::Running);

        info!(
            workers = count,
            requeued,
            tasks_dir = %self.ctx.store.tasks_dir().display(),
            recovery = self.settings.recovery.as_str(),
            "Task queue started"
        );
        Ok(())
    }

    async fn ensure_started(&self) -> Result<(), TaskError> {
        match self.state() {
            LifecycleState::Running => Ok(()),
            LifecycleState::NotStarted => self.start().await,
            LifecycleState::Stopping | LifecycleState::Stopped => Err(TaskError::Unavailable(
                "task queue has been shut down".into(),
            )),
        }
    }

    async fn recover(&self) -> Result<usize, TaskError> {
        let store = &self.ctx.store;
        let mut requeued = 0;

        for record in store.load_all().await? {
            match record.status {
                TaskStatus::Pending => {
                    self.ctx.queue.enqueue(record.task_id);
                    requeued += 1;
                }
                TaskStatus::Processing => match self.settings.recovery {
                    RecoveryPolicy::Requeue => {
                        store.update(&record.task_id, |r| r.requeue()).await?;
                        info!(task_id = %record.task_id, "Requeued task interrupted by restart");
                        self.ctx.queue.enqueue(record.task_id);
                        requeued += 1;
                    }
                    RecoveryPolicy::Fail => {
                        store
                            .update(&record.task_id, |r| r.fail(INTERRUPTED_MESSAGE))
                            .await?;
                        discard_output(self.ctx.files.as_ref(), &record.file_id, &record.task_id)
                            .await;
                        self.ctx.metrics.record_failed();
                        warn!(task_id = %record.task_id, "Failed task interrupted by restart");
                    }
                },
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }

        Ok(requeued)
    }

    /// Stop accepting work, let workers finish and abort those exceeding the grace period.
    ///
    /// Tasks aborted here stay `processing` on disk and are handled by recovery at next start.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        match self.state() {
            LifecycleState::Running => {}
            LifecycleState::NotStarted => {
                self.set_state(LifecycleState::Stopped);
                return;
            }
            LifecycleState::Stopping | LifecycleState::Stopped => return,
        }
        self.set_state(LifecycleState::Stopping);
        info!(workers = workers.len(), "Stopping task queue");

        for _ in 0..workers.len() {
            self.ctx.queue.enqueue_stop();
        }

        let grace = self.settings.shutdown_grace;
        let mut handles: Vec<JoinHandle<()>> = workers.drain(..).collect();
        let drained =
            tokio::time::timeout(grace, futures_util::future::join_all(handles.iter_mut())).await;

        if drained.is_err() {
            let in_flight = self.ctx.cancellations.len();
            warn!(
                grace_secs = grace.as_secs(),
                in_flight, "Workers did not stop in time; aborting in-flight splits"
            );
            self.ctx.cancellations.cancel_all();
            for handle in handles.into_iter().filter(|handle| !handle.is_finished()) {
                handle.abort();
                let _ = handle.await;
            }
        }

        self.set_state(LifecycleState::Stopped);
        info!("Task queue stopped");
    }
}

#[async_trait]
impl SplitTaskApi for TaskOrchestrator {
    async fn create_task(
        &self,
        file_id: &str,
        chapters: Vec<ChapterSpec>,
    ) -> Result<TaskRecord, TaskError> {
        self.ensure_started().await?;
        validate_chapters(&chapters)?;
        self.ctx
            .files
            .resolve(file_id)
            .await
            .map_err(|err| file_error(file_id, err))?;

        let record = self.ctx.store.create(file_id, chapters).await?;
        self.ctx.metrics.record_created();
        self.ctx.queue.enqueue(record.task_id.clone());
        info!(
            task_id = %record.task_id,
            file_id,
            chapters = record.chapters.len(),
            "Split task queued"
        );
        Ok(record)
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.ensure_started().await?;
        self.ctx.store.get(task_id)
    }

    async fn list_tasks(&self, file_id: Option<&str>) -> Result<Vec<TaskRecord>, TaskError> {
        self.ensure_started().await?;
        Ok(self.ctx.store.list(file_id))
    }

    async fn list_active_tasks(&self) -> Result<Vec<TaskRecord>, TaskError> {
        self.ensure_started().await?;
        Ok(self.ctx.store.active())
    }

    async fn queue_status(&self) -> Result<QueueStatus, TaskError> {
        self.ensure_started().await?;
        Ok(QueueStatus {
            queue_size: self.ctx.queue.depth(),
            active_workers: self.ctx.active_workers.load(Ordering::SeqCst),
            processing_tasks: self.ctx.cancellations.len(),
            task_counts: self.ctx.store.counts(),
        })
    }

    async fn cancel_task(&self, task_id: &str) -> Result<bool, TaskError> {
        self.ensure_started().await?;
        let cancelled = match self
            .ctx
            .store
            .update(task_id, |r| r.fail(CANCELLED_MESSAGE))
            .await
        {
            Ok(changed) => changed,
            Err(TaskError::NotFound { .. }) => false,
            Err(err) => return Err(err),
        };

        if cancelled {
            self.ctx.cancellations.cancel(task_id);
            self.ctx.metrics.record_cancelled();
            info!(task_id, "Split task cancelled");
        }
        Ok(cancelled)
    }

    async fn cleanup(&self, retention: Duration) -> Result<usize, TaskError> {
        self.ensure_started().await?;
        let retention = time::Duration::try_from(retention)
            .map_err(|_| TaskError::InvalidInput("retention window is too large".into()))?;
        let Some(cutoff) = OffsetDateTime::now_utc().checked_sub(retention) else {
            return Ok(0);
        };

        let mut removed = 0;
        for task_id in self.ctx.store.expired_before(cutoff) {
            match self.ctx.store.delete(&task_id).await {
                Ok(record) => {
                    discard_output(self.ctx.files.as_ref(), &record.file_id, &record.task_id)
                        .await;
                    removed += 1;
                }
                Err(TaskError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        if removed > 0 {
            info!(removed, retention_secs = retention.whole_seconds(), "Removed expired tasks");
        }
        Ok(removed)
    }

    async fn delete_file(&self, file_id: &str) -> Result<usize, TaskError> {
        self.ensure_started().await?;
        let records = self.ctx.store.list(Some(file_id));
        let unfinished = records.iter().filter(|r| r.status.is_active()).count();
        if unfinished > 0 {
            return Err(TaskError::Conflict(format!(
                "file {file_id} still has {unfinished} unfinished task(s)"
            )));
        }

        self.ctx
            .files
            .delete_file(file_id)
            .await
            .map_err(|err| file_error(file_id, err))?;

        let mut removed = 0;
        for record in records {
            match self.ctx.store.delete(&record.task_id).await {
                Ok(_) => removed += 1,
                Err(TaskError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        info!(file_id, removed, "Deleted file and its tasks");
        Ok(removed)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }
}

fn file_error(file_id: &str, err: StorageError) -> TaskError {
    match err {
        StorageError::Io(io) => TaskError::Persistence(PersistenceError::Io(io)),
        _ => TaskError::NotFound {
            entity: "file",
            id: file_id.to_string(),
        },
    }
}
