//! Progress and cancellation signals shared between a worker and its split engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Handle passed to a split engine for reporting percentages.
///
/// Cloneable and usable from blocking threads. Reports are delivered in order to the worker
/// that owns the task; once that worker stops listening they are silently dropped.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<u8>>,
    cancelled: Arc<AtomicBool>,
}

impl ProgressReporter {
    /// Create a reporter and the receiving end drained by the worker.
    pub fn channel(cancelled: Arc<AtomicBool>) -> (Self, mpsc::UnboundedReceiver<u8>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
                cancelled,
            },
            receiver,
        )
    }

    /// Reporter that discards every update, for running an engine outside the queue.
    pub fn detached() -> Self {
        Self {
            sender: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report overall completion as a percentage; values above 100 are capped.
    pub fn report(&self, percent: u8) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(percent.min(100));
        }
    }

    /// Whether the task was cancelled and the engine may stop early.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancel flags of in-flight executions, keyed by task id.
#[derive(Default)]
pub struct CancellationRegistry {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl CancellationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution and return its flag.
    pub fn register(&self, task_id: &str) -> Arc<AtomicBool> {
        self.lock()
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Raise the flag for `task_id`; returns whether an execution was registered.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.lock().get(task_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Raise every registered flag.
    pub fn cancel_all(&self) {
        for flag in self.lock().values() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Forget the execution of `task_id`.
    pub fn release(&self, task_id: &str) {
        self.lock().remove(task_id);
    }

    /// Number of registered executions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no execution is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_arrive_in_order_and_capped() {
        let (reporter, mut receiver) = ProgressReporter::channel(Arc::new(AtomicBool::new(false)));
        let clone = reporter.clone();
        std::thread::spawn(move || {
            clone.report(10);
            clone.report(250);
        })
        .join()
        .expect("reporter thread");
        drop(reporter);

        assert_eq!(receiver.recv().await, Some(10));
        assert_eq!(receiver.recv().await, Some(100));
        assert_eq!(receiver.recv().await, None);
    }

    #[test]
    fn detached_reporter_ignores_updates() {
        let reporter = ProgressReporter::detached();
        reporter.report(50);
        assert!(!reporter.is_cancelled());
    }

    #[test]
    fn registry_flags_reach_reporters() {
        let registry = CancellationRegistry::new();
        let flag = registry.register("task-1");
        let (reporter, _receiver) = ProgressReporter::channel(flag);

        assert!(!registry.cancel("other"));
        assert!(registry.cancel("task-1"));
        assert!(reporter.is_cancelled());

        registry.release("task-1");
        assert!(registry.is_empty());
        assert!(!registry.cancel("task-1"));
    }

    #[test]
    fn cancel_all_raises_every_flag() {
        let registry = CancellationRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        registry.cancel_all();
        assert!(a.load(Ordering::SeqCst));
        assert!(b.load(Ordering::SeqCst));
        assert_eq!(registry.len(), 2);
    }
}
