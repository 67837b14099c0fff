//! Worker loop executing one split task at a time.

use crate::metrics::QueueMetrics;
use crate::splitter::{SplitEngine, SplitError, SplitRequest};
use crate::storage::FileStorage;
use crate::tasks::progress::{CancellationRegistry, ProgressReporter};
use crate::tasks::queue::{QueueMessage, WorkQueue};
use crate::tasks::store::TaskStore;
use crate::tasks::types::TaskRecord;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared collaborators handed to every worker.
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<TaskStore>,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) files: Arc<dyn FileStorage>,
    pub(crate) engine: Arc<dyn SplitEngine>,
    pub(crate) cancellations: Arc<CancellationRegistry>,
    pub(crate) metrics: Arc<QueueMetrics>,
    pub(crate) active_workers: AtomicUsize,
}

/// Pull task identifiers until a stop sentinel arrives.
pub(crate) async fn run_worker(name: String, ctx: Arc<WorkerContext>) {
    let _alive = CounterGuard::enter(&ctx.active_workers);
    debug!(worker = %name, "Worker started");

    loop {
        let task_id = match ctx.queue.dequeue().await {
            QueueMessage::Task(task_id) => task_id,
            QueueMessage::Stop => break,
        };

        let Some(record) = ctx.store.claim(&task_id).await else {
            debug!(worker = %name, task_id = %task_id, "Skipping task that is no longer pending");
            continue;
        };

        info!(
            worker = %name,
            task_id = %record.task_id,
            file_id = %record.file_id,
            chapters = record.chapters.len(),
            "Processing split task"
        );
        execute(&ctx, &name, record).await;
    }

    debug!(worker = %name, "Worker stopped");
}

async fn execute(ctx: &WorkerContext, worker: &str, record: TaskRecord) {
    let task_id = record.task_id.clone();
    let file_id = record.file_id.clone();
    let cancelled = ctx.cancellations.register(&task_id);
    let _registration = Registration {
        registry: &ctx.cancellations,
        task_id: &task_id,
    };

    let (reporter, updates) = ProgressReporter::channel(cancelled);
    let mut pump = AbortOnDrop(tokio::spawn(pump_progress(
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.metrics),
        task_id.clone(),
        updates,
    )));

    let expected = record.chapters.len();
    let outcome = run_split(ctx, record, reporter).await;

    // Every reporter clone is gone once the engine returns, so the pump drains and exits.
    if let Err(err) = (&mut pump.0).await {
        warn!(task_id = %task_id, error = %err, "Progress pump ended abnormally");
    }

    let outcome = outcome.and_then(|links| {
        if links.len() == expected {
            Ok(links)
        } else {
            Err(SplitError::Aborted(format!(
                "engine produced {} artifacts for {} chapters",
                links.len(),
                expected
            )))
        }
    });

    let completed = match outcome {
        Ok(links) => match ctx.store.update(&task_id, move |r| r.complete(links)).await {
            Ok(true) => {
                ctx.metrics.record_completed();
                info!(worker, task_id = %task_id, "Split task completed");
                true
            }
            Ok(false) => {
                info!(worker, task_id = %task_id, "Discarding split result for task that already finished");
                false
            }
            Err(err) => {
                warn!(worker, task_id = %task_id, error = %err, "Task vanished before completion");
                false
            }
        },
        Err(split_err) => {
            let message = split_err.to_string();
            match ctx.store.update(&task_id, |r| r.fail(message)).await {
                Ok(true) => {
                    ctx.metrics.record_failed();
                    warn!(worker, task_id = %task_id, error = %split_err, "Split task failed");
                }
                Ok(false) => {
                    debug!(worker, task_id = %task_id, error = %split_err, "Split stopped for task that already finished");
                }
                Err(err) => warn!(worker, task_id = %task_id, error = %err, "Task vanished before failure was recorded"),
            }
            false
        }
    };

    if !completed {
        discard_output(ctx.files.as_ref(), &file_id, &task_id).await;
    }
}

/// Remove whatever a task wrote; artifacts only survive for completed tasks.
pub(crate) async fn discard_output(files: &dyn FileStorage, file_id: &str, task_id: &str) {
    if let Err(err) = files.discard_output(file_id, task_id).await {
        warn!(task_id, file_id, error = %err, "Failed to remove task artifacts");
    }
}

async fn run_split(
    ctx: &WorkerContext,
    record: TaskRecord,
    reporter: ProgressReporter,
) -> Result<Vec<String>, SplitError> {
    let source = ctx
        .files
        .resolve(&record.file_id)
        .await
        .map_err(|err| SplitError::SourceMissing(err.to_string()))?;
    let output_dir = ctx
        .files
        .output_dir(&record.file_id, &record.task_id)
        .map_err(|err| SplitError::SourceMissing(err.to_string()))?;
    // A run interrupted by a restart may have left partial artifacts behind.
    discard_output(ctx.files.as_ref(), &record.file_id, &record.task_id).await;
    tokio::fs::create_dir_all(&output_dir).await?;

    let engine = Arc::clone(&ctx.engine);
    let request = SplitRequest {
        source,
        chapters: record.chapters,
        output_dir,
    };
    let mut split = AbortOnDrop(tokio::spawn(async move {
        engine.split(request, reporter).await
    }));

    match (&mut split.0).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(SplitError::Aborted(panic_message(err.into_panic()))),
        Err(err) => Err(SplitError::Aborted(err.to_string())),
    }
}

async fn pump_progress(
    store: Arc<TaskStore>,
    metrics: Arc<QueueMetrics>,
    task_id: String,
    mut updates: mpsc::UnboundedReceiver<u8>,
) {
    while let Some(percent) = updates.recv().await {
        match store.update(&task_id, |r| r.apply_progress(percent)).await {
            Ok(true) => {
                metrics.record_progress_write();
                debug!(task_id = %task_id, progress = percent, "Progress updated");
            }
            Ok(false) => {}
            Err(_) => break,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("split engine panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("split engine panicked: {message}")
    } else {
        "split engine panicked".to_string()
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Registration<'a> {
    registry: &'a CancellationRegistry,
    task_id: &'a str,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.release(self.task_id);
    }
}

struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
