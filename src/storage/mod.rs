//! Local storage for uploaded source documents and their chapter artifacts.
//!
//! Layout under the upload root:
//!
//! ```text
//! <root>/<file_id>/original.pdf
//! <root>/<file_id>/metadata.json
//! <root>/<file_id>/chapters/<task_id>/NN_<title>.pdf
//! ```
//!
//! Every task writes into its own directory, so splitting the same file twice never touches the
//! artifacts of an earlier task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const ORIGINAL_FILENAME: &str = "original.pdf";
const METADATA_FILENAME: &str = "metadata.json";
const CHAPTERS_DIRNAME: &str = "chapters";
const PDF_MAGIC: &[u8] = b"%PDF";

/// Errors raised by file storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested file or artifact does not exist.
    #[error("File not found: {0}")]
    NotFound(String),
    /// Upload was rejected by validation.
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
    /// Upload exceeded the configured size limit.
    #[error("File exceeds the maximum size of {limit} bytes")]
    TooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Metadata could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata recorded for every accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Identifier assigned to the upload.
    pub file_id: String,
    /// Filename supplied by the client.
    pub filename: String,
    /// Size of the stored document in bytes.
    pub file_size: u64,
    /// Time the upload was stored.
    #[serde(with = "time::serde::rfc3339")]
    pub upload_time: OffsetDateTime,
}

/// Storage collaborator used by the task queue and the HTTP layer.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Path of the source document for `file_id`.
    async fn resolve(&self, file_id: &str) -> Result<PathBuf, StorageError>;

    /// Metadata recorded when `file_id` was uploaded.
    async fn file_info(&self, file_id: &str) -> Result<FileInfo, StorageError>;

    /// Validate and store an uploaded document, returning its metadata.
    async fn store_upload(&self, filename: &str, bytes: &[u8]) -> Result<FileInfo, StorageError>;

    /// Remove an uploaded document together with every artifact produced from it.
    async fn delete_file(&self, file_id: &str) -> Result<(), StorageError>;

    /// Directory receiving the artifacts of one task.
    fn output_dir(&self, file_id: &str, task_id: &str) -> Result<PathBuf, StorageError>;

    /// Remove the artifacts of one task; a missing directory is not an error.
    async fn discard_output(&self, file_id: &str, task_id: &str) -> Result<(), StorageError>;

    /// Path of an existing artifact written by `task_id`.
    async fn artifact_path(
        &self,
        file_id: &str,
        task_id: &str,
        artifact: &str,
    ) -> Result<PathBuf, StorageError>;

    /// Sorted filenames of the artifacts present for one task.
    async fn list_chapter_files(
        &self,
        file_id: &str,
        task_id: &str,
    ) -> Result<Vec<String>, StorageError>;
}

/// Filesystem-backed [`FileStorage`].
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
    max_file_size: usize,
}

impl LocalFileStorage {
    /// Create storage rooted at `root` accepting uploads up to `max_file_size` bytes.
    pub fn new(root: impl Into<PathBuf>, max_file_size: usize) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    fn file_dir(&self, file_id: &str) -> Result<PathBuf, StorageError> {
        ensure_safe_component(file_id)?;
        Ok(self.root.join(file_id))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn resolve(&self, file_id: &str) -> Result<PathBuf, StorageError> {
        let path = self.file_dir(file_id)?.join(ORIGINAL_FILENAME);
        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(StorageError::NotFound(file_id.to_string()))
        }
    }

    async fn file_info(&self, file_id: &str) -> Result<FileInfo, StorageError> {
        let path = self.file_dir(file_id)?.join(METADATA_FILENAME);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(file_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn store_upload(&self, filename: &str, bytes: &[u8]) -> Result<FileInfo, StorageError> {
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(StorageError::InvalidUpload(
                "only PDF files are accepted".into(),
            ));
        }
        if bytes.len() > self.max_file_size {
            return Err(StorageError::TooLarge {
                limit: self.max_file_size,
            });
        }
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(StorageError::InvalidUpload(
                "file does not start with a PDF header".into(),
            ));
        }

        let file_id = Uuid::new_v4().to_string();
        let dir = self.file_dir(&file_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(ORIGINAL_FILENAME), bytes).await?;

        let info = FileInfo {
            file_id,
            filename: filename.to_string(),
            file_size: bytes.len() as u64,
            upload_time: OffsetDateTime::now_utc(),
        };
        let metadata = serde_json::to_vec_pretty(&info)?;
        tokio::fs::write(dir.join(METADATA_FILENAME), metadata).await?;

        info!(file_id = %info.file_id, filename, size = info.file_size, "Stored upload");
        Ok(info)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), StorageError> {
        // Only upload directories are removable, never `<root>/tasks`.
        self.resolve(file_id).await?;
        let dir = self.file_dir(file_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(file_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        info!(file_id, "Deleted upload");
        Ok(())
    }

    fn output_dir(&self, file_id: &str, task_id: &str) -> Result<PathBuf, StorageError> {
        ensure_safe_component(task_id)?;
        Ok(self.file_dir(file_id)?.join(CHAPTERS_DIRNAME).join(task_id))
    }

    async fn discard_output(&self, file_id: &str, task_id: &str) -> Result<(), StorageError> {
        let dir = self.output_dir(file_id, task_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(file_id, task_id, "Removed task artifacts");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn artifact_path(
        &self,
        file_id: &str,
        task_id: &str,
        artifact: &str,
    ) -> Result<PathBuf, StorageError> {
        ensure_safe_component(artifact)?;
        let path = self.output_dir(file_id, task_id)?.join(artifact);
        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(StorageError::NotFound(format!("{file_id}/{task_id}/{artifact}")))
        }
    }

    async fn list_chapter_files(
        &self,
        file_id: &str,
        task_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        let dir = self.output_dir(file_id, task_id)?;
        let listing = tokio::task::spawn_blocking(move || collect_pdf_names(&dir))
            .await
            .map_err(|err| StorageError::Io(std::io::Error::other(err)))?;
        Ok(listing)
    }
}

fn collect_pdf_names(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable chapter entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn ensure_safe_component(value: &str) -> Result<(), StorageError> {
    let unsafe_component = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if unsafe_component {
        return Err(StorageError::NotFound(value.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &[u8] = b"%PDF-1.5\n%%EOF\n";

    #[tokio::test]
    async fn stores_upload_with_metadata() {
        let dir = TempDir::new().expect("tempdir");
        let storage = LocalFileStorage::new(dir.path(), 1024);

        let info = storage
            .store_upload("Book.PDF", SAMPLE)
            .await
            .expect("upload");
        assert_eq!(info.file_size, SAMPLE.len() as u64);

        let path = storage.resolve(&info.file_id).await.expect("resolve");
        assert_eq!(std::fs::read(&path).expect("read original"), SAMPLE);

        let metadata: FileInfo = serde_json::from_slice(
            &std::fs::read(dir.path().join(&info.file_id).join(METADATA_FILENAME))
                .expect("read metadata"),
        )
        .expect("decode metadata");
        assert_eq!(metadata, info);
    }

    #[tokio::test]
    async fn rejects_invalid_uploads() {
        let dir = TempDir::new().expect("tempdir");
        let storage = LocalFileStorage::new(dir.path(), 8);

        assert!(matches!(
            storage.store_upload("notes.txt", SAMPLE).await,
            Err(StorageError::InvalidUpload(_))
        ));
        assert!(matches!(
            storage.store_upload("big.pdf", SAMPLE).await,
            Err(StorageError::TooLarge { limit: 8 })
        ));
        assert!(matches!(
            storage.store_upload("fake.pdf", b"hello").await,
            Err(StorageError::InvalidUpload(_))
        ));
    }

    #[tokio::test]
    async fn unknown_and_traversing_ids_are_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let storage = LocalFileStorage::new(dir.path(), 1024);

        assert!(matches!(
            storage.resolve("missing").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.resolve("../etc").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage
                .artifact_path("missing", "task-1", "../../secret.pdf")
                .await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.output_dir("file-a", ".."),
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lists_only_pdf_artifacts_of_one_task() {
        let dir = TempDir::new().expect("tempdir");
        let storage = LocalFileStorage::new(dir.path(), 1024);
        assert!(
            storage
                .list_chapter_files("file-a", "task-1")
                .await
                .expect("list")
                .is_empty()
        );

        let first = storage.output_dir("file-a", "task-1").expect("output dir");
        let second = storage.output_dir("file-a", "task-2").expect("output dir");
        std::fs::create_dir_all(&first).expect("mkdir");
        std::fs::create_dir_all(&second).expect("mkdir");
        std::fs::write(first.join("02_Body.pdf"), SAMPLE).expect("write");
        std::fs::write(first.join("01_Intro.pdf"), SAMPLE).expect("write");
        std::fs::write(first.join("03_Tail.pdf.tmp"), SAMPLE).expect("write");
        std::fs::write(second.join("01_Other.pdf"), SAMPLE).expect("write");

        let listed = storage
            .list_chapter_files("file-a", "task-1")
            .await
            .expect("list");
        assert_eq!(listed, vec!["01_Intro.pdf", "02_Body.pdf"]);

        let path = storage
            .artifact_path("file-a", "task-1", "01_Intro.pdf")
            .await
            .expect("artifact");
        assert!(path.ends_with("chapters/task-1/01_Intro.pdf"));
        assert!(
            storage
                .artifact_path("file-a", "task-2", "01_Intro.pdf")
                .await
                .is_err()
        );

        storage
            .discard_output("file-a", "task-1")
            .await
            .expect("discard");
        assert!(!first.exists());
        assert!(second.exists());
        storage
            .discard_output("file-a", "task-1")
            .await
            .expect("discarding twice is fine");
    }

    #[tokio::test]
    async fn file_info_reads_upload_metadata() {
        let dir = TempDir::new().expect("tempdir");
        let storage = LocalFileStorage::new(dir.path(), 1024);
        let info = storage
            .store_upload("Atlas.pdf", SAMPLE)
            .await
            .expect("upload");

        assert_eq!(storage.file_info(&info.file_id).await.expect("info"), info);
        assert!(matches!(
            storage.file_info("missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_file_removes_upload_and_artifacts() {
        let dir = TempDir::new().expect("tempdir");
        let storage = LocalFileStorage::new(dir.path(), 1024);
        let info = storage
            .store_upload("Atlas.pdf", SAMPLE)
            .await
            .expect("upload");
        let output = storage
            .output_dir(&info.file_id, "task-1")
            .expect("output dir");
        std::fs::create_dir_all(&output).expect("mkdir");
        std::fs::write(output.join("01_Intro.pdf"), SAMPLE).expect("write");

        storage.delete_file(&info.file_id).await.expect("delete");
        assert!(!dir.path().join(&info.file_id).exists());
        assert!(matches!(
            storage.resolve(&info.file_id).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete_file(&info.file_id).await,
            Err(StorageError::NotFound(_))
        ));

        std::fs::create_dir_all(dir.path().join("tasks")).expect("mkdir tasks");
        assert!(matches!(
            storage.delete_file("tasks").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(dir.path().join("tasks").exists());
    }
}
