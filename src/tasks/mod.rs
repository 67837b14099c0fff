//! Persistent split task queue: records, storage, workers and lifecycle.

mod orchestrator;
mod progress;
mod queue;
mod store;
mod types;
mod worker;

pub use orchestrator::{LifecycleState, SplitTaskApi, TaskOrchestrator};
pub use progress::{CancellationRegistry, ProgressReporter};
pub use queue::{QueueMessage, WorkQueue};
pub use store::TaskStore;
pub use types::{
    CANCELLED_MESSAGE, ChapterSpec, INTERRUPTED_MESSAGE, PersistenceError, QueueSettings,
    QueueStatus, RecoveryPolicy, TaskCounts, TaskError, TaskRecord, TaskStatus, validate_chapters,
};
