//! FIFO hand-off of task identifiers to the worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

/// Item delivered to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    /// Execute the task with this identifier.
    Task(String),
    /// Exit the worker loop.
    Stop,
}

/// Unbounded multi-consumer queue; each message reaches exactly one worker.
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<QueueMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<QueueMessage>>,
    depth: AtomicUsize,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
        }
    }

    /// Append a task identifier. Never blocks.
    pub fn enqueue(&self, task_id: impl Into<String>) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        // The queue owns its receiver, so the channel cannot be closed while `self` is alive.
        let _ = self.sender.send(QueueMessage::Task(task_id.into()));
    }

    /// Append a stop sentinel for one worker.
    pub fn enqueue_stop(&self) {
        let _ = self.sender.send(QueueMessage::Stop);
    }

    /// Wait for the next message.
    pub async fn dequeue(&self) -> QueueMessage {
        let message = {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        };

        match message {
            Some(QueueMessage::Task(task_id)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                QueueMessage::Task(task_id)
            }
            Some(QueueMessage::Stop) | None => QueueMessage::Stop,
        }
    }

    /// Task identifiers waiting to be picked up.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_in_fifo_order_and_tracks_depth() {
        let queue = WorkQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue_stop();
        assert_eq!(queue.depth(), 2);

        assert_eq!(queue.dequeue().await, QueueMessage::Task("a".into()));
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.dequeue().await, QueueMessage::Task("b".into()));
        assert_eq!(queue.dequeue().await, QueueMessage::Stop);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn each_message_reaches_one_consumer() {
        let queue = Arc::new(WorkQueue::new());
        let mut consumers = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let QueueMessage::Task(id) = queue.dequeue().await {
                    seen.push(id);
                }
                seen
            }));
        }

        for i in 0..30 {
            queue.enqueue(i.to_string());
        }
        for _ in 0..3 {
            queue.enqueue_stop();
        }

        let mut all = Vec::new();
        for consumer in consumers {
            let seen = tokio::time::timeout(Duration::from_secs(5), consumer)
                .await
                .expect("consumer finished")
                .expect("consumer joined");
            all.extend(seen);
        }
        all.sort_by_key(|id| id.parse::<u32>().expect("numeric id"));
        let expected: Vec<String> = (0..30).map(|i: u32| i.to_string()).collect();
        assert_eq!(all, expected);
    }
}
