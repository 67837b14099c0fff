use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing task queue activity.
#[derive(Default)]
pub struct QueueMetrics {
    tasks_created: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_cancelled: AtomicU64,
    progress_writes: AtomicU64,
    persistence_failures: AtomicU64,
}

impl QueueMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly accepted split task.
    pub fn record_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that produced every chapter artifact.
    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that ended in `failed` because of an execution error.
    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task failed by explicit cancellation.
    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an applied progress update.
    pub fn record_progress_write(&self) {
        self.progress_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot write that did not reach disk.
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            progress_writes: self.progress_writes.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of queue counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Tasks accepted since startup.
    pub tasks_created: u64,
    /// Tasks that completed successfully.
    pub tasks_completed: u64,
    /// Tasks that failed during execution or recovery.
    pub tasks_failed: u64,
    /// Tasks failed through cancellation.
    pub tasks_cancelled: u64,
    /// Progress updates applied to task records.
    pub progress_writes: u64,
    /// Snapshot writes that failed and left only the in-memory state updated.
    pub persistence_failures: u64,
}
