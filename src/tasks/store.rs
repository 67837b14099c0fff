//! In-memory task map backed by one JSON snapshot per task.

use crate::metrics::QueueMetrics;
use crate::tasks::types::{
    ChapterSpec, PersistenceError, TaskCounts, TaskError, TaskRecord, validate_chapters,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use time::OffsetDateTime;
use tracing::{debug, error, warn};
use uuid::Uuid;

const SNAPSHOT_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Authoritative owner of every task record.
///
/// The map lock is synchronous and never held across an await point. Snapshot writes for a single
/// task are serialized by a per-task gate and always encode the record as it is at write time, so
/// the file on disk converges to the latest in-memory state.
pub struct TaskStore {
    tasks_dir: PathBuf,
    tasks: RwLock<HashMap<String, TaskRecord>>,
    write_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    metrics: Arc<QueueMetrics>,
}

impl TaskStore {
    /// Create an empty store persisting into `tasks_dir`.
    pub fn new(tasks_dir: impl Into<PathBuf>, metrics: Arc<QueueMetrics>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
            tasks: RwLock::new(HashMap::new()),
            write_gates: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Directory holding the task snapshots.
    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    /// Validate, insert and persist a new pending task.
    pub async fn create(
        &self,
        file_id: &str,
        chapters: Vec<ChapterSpec>,
    ) -> Result<TaskRecord, TaskError> {
        validate_chapters(&chapters)?;
        let record = TaskRecord::new_pending(
            Uuid::new_v4().to_string(),
            file_id.to_string(),
            chapters,
        );
        self.write_map()
            .insert(record.task_id.clone(), record.clone());
        self.persist(&record.task_id).await;
        Ok(record)
    }

    /// Return a copy of the task.
    pub fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.read_map()
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskError::task_not_found(task_id))
    }

    /// List tasks, newest first, optionally restricted to one source file.
    pub fn list(&self, file_id: Option<&str>) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .read_map()
            .values()
            .filter(|record| file_id.is_none_or(|id| record.file_id == id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Tasks in `pending` or `processing`, oldest first.
    pub fn active(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .read_map()
            .values()
            .filter(|record| record.status.is_active())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Atomically move a pending task to `processing` and persist it.
    ///
    /// Returns `None` when the task is unknown or not pending, which makes duplicate queue
    /// entries harmless.
    pub async fn claim(&self, task_id: &str) -> Option<TaskRecord> {
        let claimed = {
            let mut tasks = self.write_map();
            let record = tasks.get_mut(task_id)?;
            record.start_processing().then(|| record.clone())
        };
        if claimed.is_some() {
            self.persist(task_id).await;
        }
        claimed
    }

    /// Apply `mutate` under the store lock and persist when it reports a change.
    pub async fn update<F>(&self, task_id: &str, mutate: F) -> Result<bool, TaskError>
    where
        F: FnOnce(&mut TaskRecord) -> bool,
    {
        let changed = {
            let mut tasks = self.write_map();
            let record = tasks
                .get_mut(task_id)
                .ok_or_else(|| TaskError::task_not_found(task_id))?;
            mutate(record)
        };
        if changed {
            self.persist(task_id).await;
        }
        Ok(changed)
    }

    /// Per-status counts over every tracked task.
    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for record in self.read_map().values() {
            counts.record(record.status);
        }
        counts
    }

    /// Identifiers of terminal tasks completed before `cutoff`.
    pub fn expired_before(&self, cutoff: OffsetDateTime) -> Vec<String> {
        self.read_map()
            .values()
            .filter(|record| record.expired_before(cutoff))
            .map(|record| record.task_id.clone())
            .collect()
    }

    /// Remove a task from memory and disk, returning the removed record.
    pub async fn delete(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        let gate = self.gate(task_id);
        let _guard = gate.lock().await;

        let Some(removed) = self.write_map().remove(task_id) else {
            return Err(TaskError::task_not_found(task_id));
        };

        let path = self.snapshot_path(task_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(task_id, path = %path.display(), error = %err, "Failed to remove task snapshot");
            }
        }

        self.write_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        Ok(removed)
    }

    /// Write the current in-memory state of a task to its snapshot file.
    pub async fn save(&self, task_id: &str) -> Result<(), PersistenceError> {
        let gate = self.gate(task_id);
        let _guard = gate.lock().await;

        let Some(record) = self.read_map().get(task_id).cloned() else {
            debug!(task_id, "Skipping snapshot for deleted task");
            return Ok(());
        };

        let payload = serde_json::to_vec_pretty(&record)?;
        tokio::fs::create_dir_all(&self.tasks_dir).await?;
        atomic_write(&self.snapshot_path(task_id), &payload).await
    }

    /// Read every snapshot from disk into memory, returning the records oldest first.
    ///
    /// Unparseable snapshots are skipped and leftover temporary files are removed.
    pub async fn load_all(&self) -> Result<Vec<TaskRecord>, TaskError> {
        tokio::fs::create_dir_all(&self.tasks_dir)
            .await
            .map_err(PersistenceError::from)?;

        let mut entries = tokio::fs::read_dir(&self.tasks_dir)
            .await
            .map_err(PersistenceError::from)?;
        let mut loaded = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(PersistenceError::from)? {
            let path = entry.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(TEMP_EXTENSION) => {
                    if let Err(err) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %err, "Failed to remove stale temp snapshot");
                    }
                }
                Some(SNAPSHOT_EXTENSION) => match read_snapshot(&path).await {
                    Ok(record) => loaded.push(record),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Skipping unreadable task snapshot");
                    }
                },
                _ => {}
            }
        }

        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        {
            let mut tasks = self.write_map();
            for record in &loaded {
                tasks.insert(record.task_id.clone(), record.clone());
            }
        }
        debug!(count = loaded.len(), dir = %self.tasks_dir.display(), "Loaded task snapshots");
        Ok(loaded)
    }

    async fn persist(&self, task_id: &str) {
        if let Err(err) = self.save(task_id).await {
            self.metrics.record_persistence_failure();
            error!(task_id, error = %err, "Failed to persist task snapshot");
        }
    }

    fn snapshot_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir
            .join(format!("{task_id}.{SNAPSHOT_EXTENSION}"))
    }

    fn gate(&self, task_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn atomic_write(path: &Path, payload: &[u8]) -> Result<(), PersistenceError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".");
    tmp.push(TEMP_EXTENSION);
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_snapshot(path: &Path) -> Result<TaskRecord, PersistenceError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::types::TaskStatus;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TaskStore {
        TaskStore::new(dir.path().join("tasks"), Arc::new(QueueMetrics::new()))
    }

    fn chapters() -> Vec<ChapterSpec> {
        vec![
            ChapterSpec::new("Intro", 1, 5),
            ChapterSpec::new("Body", 6, 10),
        ]
    }

    #[tokio::test]
    async fn create_persists_pending_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);

        let record = store.create("file-a", chapters()).await.expect("create");
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);

        let path = store.snapshot_path(&record.task_id);
        let on_disk: TaskRecord =
            serde_json::from_slice(&std::fs::read(&path).expect("snapshot")).expect("decode");
        assert_eq!(on_disk, record);
    }

    #[tokio::test]
    async fn create_rejects_empty_chapters() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);
        let err = store.create("file-a", Vec::new()).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidInput(_)));
        assert_eq!(store.counts().total, 0);
    }

    #[tokio::test]
    async fn claim_only_succeeds_once() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);
        let record = store.create("file-a", chapters()).await.expect("create");

        let claimed = store.claim(&record.task_id).await.expect("first claim");
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert!(store.claim(&record.task_id).await.is_none());
        assert!(store.claim("missing").await.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_file_and_orders_newest_first() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);
        let first = store.create("file-a", chapters()).await.expect("create");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create("file-a", chapters()).await.expect("create");
        store.create("file-b", chapters()).await.expect("create");

        let listed = store.list(Some("file-a"));
        let ids: Vec<_> = listed.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec![second.task_id.as_str(), first.task_id.as_str()]);
        assert_eq!(store.list(None).len(), 3);
    }

    #[tokio::test]
    async fn update_reports_unknown_tasks() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);
        let err = store.update("nope", |_| true).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }

    #[tokio::test]
    async fn load_all_round_trips_and_skips_garbage() {
        let dir = TempDir::new().expect("tempdir");
        let original = store(&dir);
        let record = original.create("file-a", chapters()).await.expect("create");
        original.claim(&record.task_id).await.expect("claim");
        original
            .update(&record.task_id, |r| r.apply_progress(40))
            .await
            .expect("update");
        let expected = original.get(&record.task_id).expect("get");

        let tasks_dir = original.tasks_dir().to_path_buf();
        std::fs::write(tasks_dir.join("broken.json"), b"{ not json").expect("write garbage");
        std::fs::write(tasks_dir.join("leftover.json.tmp"), b"partial").expect("write tmp");

        let reloaded = store(&dir);
        let loaded = reloaded.load_all().await.expect("load");
        assert_eq!(loaded, vec![expected.clone()]);
        assert_eq!(reloaded.get(&record.task_id).expect("get"), expected);
        assert!(!tasks_dir.join("leftover.json.tmp").exists());
    }

    #[tokio::test]
    async fn delete_removes_record_and_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);
        let record = store.create("file-a", chapters()).await.expect("create");
        let path = store.snapshot_path(&record.task_id);
        assert!(path.exists());

        let removed = store.delete(&record.task_id).await.expect("delete");
        assert_eq!(removed, record);
        assert!(!path.exists());
        assert!(store.get(&record.task_id).is_err());

        store.save(&record.task_id).await.expect("save after delete is a no-op");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_snapshot_writes_keep_memory_authoritative() {
        let dir = TempDir::new().expect("tempdir");
        let blocked = dir.path().join("tasks");
        std::fs::write(&blocked, b"not a directory").expect("write blocker");
        let metrics = Arc::new(QueueMetrics::new());
        let store = TaskStore::new(&blocked, metrics.clone());

        let record = store.create("file-a", chapters()).await.expect("create");
        assert_eq!(store.get(&record.task_id).expect("get"), record);
        assert!(store.claim(&record.task_id).await.is_some());
        assert_eq!(
            store.get(&record.task_id).expect("get").status,
            TaskStatus::Processing
        );
        assert_eq!(metrics.snapshot().persistence_failures, 2);

        let reloaded = TaskStore::new(&blocked, Arc::new(QueueMetrics::new()));
        let err = reloaded.load_all().await.unwrap_err();
        assert!(matches!(err, TaskError::Persistence(_)));
    }
}
