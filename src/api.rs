//! HTTP surface for the chapter splitter.
//!
//! - `POST /files?filename=` – Store a raw PDF upload and return its `file_id`.
//! - `GET /files/:file_id` – Upload metadata (name, size, upload time).
//! - `DELETE /files/:file_id` – Remove an upload and its finished tasks.
//! - `GET /files/:file_id/original` – Fetch the uploaded document.
//! - `GET /files/:file_id/chapters` – Artifacts of every completed task for a file.
//! - `POST /split` – Queue a split of an uploaded file into chapters.
//! - `GET /tasks` – List tasks, newest first (optional `file_id` filter).
//! - `GET /tasks/active` – Pending and processing tasks, oldest first.
//! - `GET /tasks/:task_id` – Status of one task.
//! - `POST /tasks/:task_id/cancel` – Cancel a task that has not finished.
//! - `POST /tasks/cleanup` – Remove finished tasks older than the retention window.
//! - `GET /queue/status` – Queue depth, worker activity and per-status counts.
//! - `GET /tasks/:task_id/artifacts/:artifact` – Fetch an artifact of a completed task.
//! - `GET /metrics`, `GET /health`, `GET /commands` – Observability and discovery.
//!
//! The MCP server drives the same task queue, so behavior is identical across interfaces.

use crate::storage::{FileInfo, FileStorage, StorageError};
use crate::tasks::{ChapterSpec, QueueStatus, SplitTaskApi, TaskError, TaskRecord, TaskStatus};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Request limits and defaults applied by the router.
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    /// Retention window used by `POST /tasks/cleanup` when no override is given.
    pub default_retention: Duration,
    /// Largest accepted upload body in bytes.
    pub max_upload_bytes: usize,
}

struct AppState<S> {
    tasks: Arc<S>,
    files: Arc<dyn FileStorage>,
    options: RouterOptions,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
            files: Arc::clone(&self.files),
            options: self.options,
        }
    }
}

/// Build the HTTP router over a task queue and its file storage.
pub fn create_router<S>(tasks: Arc<S>, files: Arc<dyn FileStorage>, options: RouterOptions) -> Router
where
    S: SplitTaskApi + 'static,
{
    let state = AppState {
        tasks,
        files,
        options,
    };

    Router::new()
        .route("/files", post(upload_file::<S>))
        .route(
            "/files/:file_id",
            get(get_file_info::<S>).delete(delete_file::<S>),
        )
        .route("/files/:file_id/original", get(download_original::<S>))
        .route("/files/:file_id/chapters", get(list_chapter_files::<S>))
        .route("/split", post(create_split::<S>))
        .route("/tasks", get(list_tasks::<S>))
        .route("/tasks/active", get(list_active_tasks::<S>))
        .route("/tasks/cleanup", post(cleanup_tasks::<S>))
        .route("/tasks/:task_id", get(get_task::<S>))
        .route("/tasks/:task_id/cancel", post(cancel_task::<S>))
        .route(
            "/tasks/:task_id/artifacts/:artifact",
            get(download_artifact::<S>),
        )
        .route("/queue/status", get(queue_status::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(options.max_upload_bytes.saturating_add(1)))
        .with_state(state)
}

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
}

/// Store the raw request body as a new source document.
async fn upload_file<S>(
    State(state): State<AppState<S>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<FileInfo>), AppError>
where
    S: SplitTaskApi,
{
    let info = state.files.store_upload(&params.filename, &body).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn get_file_info<S>(
    State(state): State<AppState<S>>,
    Path(file_id): Path<String>,
) -> Result<Json<FileInfo>, AppError>
where
    S: SplitTaskApi,
{
    Ok(Json(state.files.file_info(&file_id).await?))
}

#[derive(Serialize)]
struct DeleteFileResponse {
    file_id: String,
    removed_tasks: usize,
}

/// Delete an upload; refused with 409 while any of its tasks is unfinished.
async fn delete_file<S>(
    State(state): State<AppState<S>>,
    Path(file_id): Path<String>,
) -> Result<Json<DeleteFileResponse>, AppError>
where
    S: SplitTaskApi,
{
    let removed_tasks = state.tasks.delete_file(&file_id).await?;
    Ok(Json(DeleteFileResponse {
        file_id,
        removed_tasks,
    }))
}

async fn download_original<S>(
    State(state): State<AppState<S>>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError>
where
    S: SplitTaskApi,
{
    let path = state.files.resolve(&file_id).await?;
    let filename = match state.files.file_info(&file_id).await {
        Ok(info) => info.filename,
        Err(_) => "original.pdf".to_string(),
    };
    pdf_response(&path, &filename).await
}

#[derive(Serialize)]
struct TaskArtifacts {
    task_id: String,
    artifacts: Vec<String>,
}

#[derive(Serialize)]
struct ChapterFilesResponse {
    file_id: String,
    tasks: Vec<TaskArtifacts>,
}

async fn list_chapter_files<S>(
    State(state): State<AppState<S>>,
    Path(file_id): Path<String>,
) -> Result<Json<ChapterFilesResponse>, AppError>
where
    S: SplitTaskApi,
{
    state.files.resolve(&file_id).await?;
    let mut tasks = Vec::new();
    for record in state.tasks.list_tasks(Some(&file_id)).await? {
        if record.status != TaskStatus::Completed {
            continue;
        }
        let artifacts = state
            .files
            .list_chapter_files(&file_id, &record.task_id)
            .await?;
        tasks.push(TaskArtifacts {
            task_id: record.task_id,
            artifacts,
        });
    }
    Ok(Json(ChapterFilesResponse { file_id, tasks }))
}

/// Request body for `POST /split`.
#[derive(Deserialize)]
struct CreateSplitRequest {
    /// Identifier returned by `POST /files`.
    file_id: String,
    /// Chapters to extract, in output order.
    chapters: Vec<ChapterSpec>,
}

/// Queue a split task; the response carries the pending record.
async fn create_split<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<CreateSplitRequest>,
) -> Result<(StatusCode, Json<TaskRecord>), AppError>
where
    S: SplitTaskApi,
{
    let record = state
        .tasks
        .create_task(&request.file_id, request.chapters)
        .await?;
    tracing::info!(task_id = %record.task_id, file_id = %record.file_id, "Split request accepted");
    Ok((StatusCode::ACCEPTED, Json(record)))
}

#[derive(Deserialize)]
struct TaskFilter {
    #[serde(default)]
    file_id: Option<String>,
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<TaskRecord>,
}

async fn list_tasks<S>(
    State(state): State<AppState<S>>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<TaskListResponse>, AppError>
where
    S: SplitTaskApi,
{
    let tasks = state.tasks.list_tasks(filter.file_id.as_deref()).await?;
    Ok(Json(TaskListResponse { tasks }))
}

async fn list_active_tasks<S>(
    State(state): State<AppState<S>>,
) -> Result<Json<TaskListResponse>, AppError>
where
    S: SplitTaskApi,
{
    let tasks = state.tasks.list_active_tasks().await?;
    Ok(Json(TaskListResponse { tasks }))
}

async fn get_task<S>(
    State(state): State<AppState<S>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, AppError>
where
    S: SplitTaskApi,
{
    Ok(Json(state.tasks.get_task(&task_id).await?))
}

#[derive(Serialize)]
struct CancelResponse {
    task_id: String,
    cancelled: bool,
}

async fn cancel_task<S>(
    State(state): State<AppState<S>>,
    Path(task_id): Path<String>,
) -> Result<Json<CancelResponse>, AppError>
where
    S: SplitTaskApi,
{
    let cancelled = state.tasks.cancel_task(&task_id).await?;
    Ok(Json(CancelResponse { task_id, cancelled }))
}

#[derive(Deserialize)]
struct CleanupParams {
    /// Retention override in hours.
    #[serde(default)]
    max_age_hours: Option<u64>,
}

#[derive(Serialize)]
struct CleanupResponse {
    removed: usize,
}

/// Delete finished tasks older than the retention window.
async fn cleanup_tasks<S>(
    State(state): State<AppState<S>>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<CleanupResponse>, AppError>
where
    S: SplitTaskApi,
{
    let retention = params
        .max_age_hours
        .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
        .unwrap_or(state.options.default_retention);
    let removed = state.tasks.cleanup(retention).await?;
    Ok(Json(CleanupResponse { removed }))
}

async fn queue_status<S>(State(state): State<AppState<S>>) -> Result<Json<QueueStatus>, AppError>
where
    S: SplitTaskApi,
{
    Ok(Json(state.tasks.queue_status().await?))
}

/// Serve an artifact listed in the download links of a completed task.
async fn download_artifact<S>(
    State(state): State<AppState<S>>,
    Path((task_id, artifact)): Path<(String, String)>,
) -> Result<Response, AppError>
where
    S: SplitTaskApi,
{
    let record = state.tasks.get_task(&task_id).await?;
    if record.status != TaskStatus::Completed || !record.download_links.contains(&artifact) {
        return Err(StorageError::NotFound(format!("{task_id}/{artifact}")).into());
    }
    let path = state
        .files
        .artifact_path(&record.file_id, &task_id, &artifact)
        .await?;
    pdf_response(&path, &artifact).await
}

async fn pdf_response(path: &std::path::Path, filename: &str) -> Result<Response, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(StorageError::from)?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        filename.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn get_metrics<S>(State(state): State<AppState<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: SplitTaskApi,
{
    Json(state.tasks.metrics_snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery by hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/files?filename=<name>.pdf",
                description: "Upload a raw PDF body. Returns { \"file_id\": string, ... }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "split",
                method: "POST",
                path: "/split",
                description: "Queue a split of an uploaded PDF into chapter files. Returns the pending task record.",
                request_example: Some(json!({
                    "file_id": "3f0c1d9e-8a51-4d8f-9d2e-5b1f2a7c9e10",
                    "chapters": [
                        { "title": "Introduction", "start_page": 1, "end_page": 5 },
                        { "title": "Methods", "start_page": 6, "end_page": 10 }
                    ]
                })),
            },
            CommandDescriptor {
                name: "task_status",
                method: "GET",
                path: "/tasks/:task_id",
                description: "Return status, progress and download links of a split task.",
                request_example: None,
            },
            CommandDescriptor {
                name: "list_tasks",
                method: "GET",
                path: "/tasks?file_id=<optional>",
                description: "List split tasks, newest first.",
                request_example: None,
            },
            CommandDescriptor {
                name: "active_tasks",
                method: "GET",
                path: "/tasks/active",
                description: "List pending and processing tasks in queue order.",
                request_example: None,
            },
            CommandDescriptor {
                name: "cancel_task",
                method: "POST",
                path: "/tasks/:task_id/cancel",
                description: "Cancel a task that has not finished. Returns { \"cancelled\": bool }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "cleanup_tasks",
                method: "POST",
                path: "/tasks/cleanup?max_age_hours=<optional>",
                description: "Delete finished tasks older than the retention window.",
                request_example: None,
            },
            CommandDescriptor {
                name: "queue_status",
                method: "GET",
                path: "/queue/status",
                description: "Return queue depth, worker activity and task counts per status.",
                request_example: None,
            },
            CommandDescriptor {
                name: "file_info",
                method: "GET",
                path: "/files/:file_id",
                description: "Return the metadata recorded for an upload.",
                request_example: None,
            },
            CommandDescriptor {
                name: "delete_file",
                method: "DELETE",
                path: "/files/:file_id",
                description: "Delete an upload and its finished tasks. Fails with 409 while tasks are unfinished.",
                request_example: None,
            },
            CommandDescriptor {
                name: "download",
                method: "GET",
                path: "/tasks/:task_id/artifacts/:artifact",
                description: "Download an artifact listed in a completed task's download_links.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return task queue counters for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Task(TaskError),
    Storage(StorageError),
}

impl AppError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Task(TaskError::InvalidInput(_)) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Self::Task(TaskError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Task(TaskError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            Self::Task(TaskError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            Self::Task(TaskError::Persistence(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence")
            }
            Self::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Storage(StorageError::InvalidUpload(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_upload")
            }
            Self::Storage(StorageError::TooLarge { .. }) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "too_large")
            }
            Self::Storage(StorageError::Io(_) | StorageError::Serialization(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage")
            }
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Task(err) => err.to_string(),
            Self::Storage(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        }
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

impl From<TaskError> for AppError {
    fn from(inner: TaskError) -> Self {
        Self::Task(inner)
    }
}

impl From<StorageError> for AppError {
    fn from(inner: StorageError) -> Self {
        Self::Storage(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{RouterOptions, create_router, get_commands};
    use crate::metrics::MetricsSnapshot;
    use crate::storage::{FileStorage, LocalFileStorage};
    use crate::tasks::{
        CANCELLED_MESSAGE, ChapterSpec, QueueStatus, SplitTaskApi, TaskCounts, TaskError,
        TaskRecord,
    };
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{HeaderMap, Method, Request, StatusCode, header},
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[tokio::test]
    async fn commands_catalog_exposes_split_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let split = commands
            .iter()
            .find(|cmd| cmd.name == "split")
            .expect("split command present");

        assert_eq!(split.method, "POST");
        assert_eq!(split.path, "/split");
        assert!(split.request_example.is_some());
        assert!(commands.len() >= 5);
    }

    #[tokio::test]
    async fn split_route_forwards_chapters() {
        let (app, service, _dir) = router();
        let payload = json!({
            "file_id": "file-1",
            "chapters": [
                { "title": "Intro", "start_page": 1, "end_page": 5 },
                { "title": "Body", "start_page": 6, "end_page": 10 }
            ]
        });

        let response = send(app, Method::POST, "/split", Body::from(payload.to_string())).await;
        assert_eq!(response.0, StatusCode::ACCEPTED);
        assert_eq!(response.1["status"], "pending");
        assert_eq!(response.1["progress"], 0);

        let calls = service.created.lock().await.clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "file-1");
        assert_eq!(calls[0].1[1], ChapterSpec::new("Body", 6, 10));
    }

    #[tokio::test]
    async fn task_errors_map_to_status_codes() {
        let (app, _service, _dir) = router();
        let response = send(app.clone(), Method::GET, "/tasks/missing", Body::empty()).await;
        assert_eq!(response.0, StatusCode::NOT_FOUND);
        assert_eq!(response.1["error"], "not_found");

        let payload = json!({ "file_id": "file-1", "chapters": [] });
        let response = send(app, Method::POST, "/split", Body::from(payload.to_string())).await;
        assert_eq!(response.0, StatusCode::BAD_REQUEST);
        assert_eq!(response.1["error"], "invalid_input");
    }

    #[tokio::test]
    async fn cleanup_uses_default_retention_unless_overridden() {
        let (app, service, _dir) = router();
        let response = send(app.clone(), Method::POST, "/tasks/cleanup", Body::empty()).await;
        assert_eq!(response.0, StatusCode::OK);
        let response = send(
            app,
            Method::POST,
            "/tasks/cleanup?max_age_hours=2",
            Body::empty(),
        )
        .await;
        assert_eq!(response.1["removed"], 0);

        let retentions = service.cleanups.lock().await.clone();
        assert_eq!(
            retentions,
            vec![Duration::from_secs(24 * 3600), Duration::from_secs(7200)]
        );
    }

    #[tokio::test]
    async fn uploads_are_validated_and_stored() {
        let (app, _service, _dir) = router();
        let response = send(
            app.clone(),
            Method::POST,
            "/files?filename=book.pdf",
            Body::from("%PDF-1.7\n%%EOF\n"),
        )
        .await;
        assert_eq!(response.0, StatusCode::CREATED);
        let file_id = response.1["file_id"].as_str().expect("file id").to_string();

        let response = send(
            app.clone(),
            Method::POST,
            "/files?filename=notes.txt",
            Body::from("hello"),
        )
        .await;
        assert_eq!(response.0, StatusCode::BAD_REQUEST);

        let response = send(
            app.clone(),
            Method::GET,
            &format!("/files/{file_id}/chapters"),
            Body::empty(),
        )
        .await;
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1["tasks"], json!([]));

        let uri = format!("/files/{file_id}");
        let response = send(app.clone(), Method::GET, &uri, Body::empty()).await;
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1["filename"], "book.pdf");
        assert_eq!(response.1["file_size"], 15);

        let response = send(app, Method::GET, "/files/unknown", Body::empty()).await;
        assert_eq!(response.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn original_upload_can_be_downloaded() {
        let (app, _service, files, _dir) = router_with_files();
        let info = files
            .store_upload("Field Guide.pdf", SAMPLE)
            .await
            .expect("upload");

        let uri = format!("/files/{}/original", info.file_id);
        let (status, headers, body) = fetch(app.clone(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Field Guide.pdf\""
        );
        assert_eq!(body, SAMPLE);

        let (status, _, _) = fetch(app, "/files/unknown/original").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn artifacts_download_only_for_completed_tasks() {
        let (app, service, files, _dir) = router_with_files();
        let info = files.store_upload("book.pdf", SAMPLE).await.expect("upload");

        let mut done = TaskRecord::new_pending(
            "task-done".into(),
            info.file_id.clone(),
            vec![ChapterSpec::new("Intro", 1, 1)],
        );
        done.start_processing();
        done.complete(vec!["01_Intro.pdf".into()]);
        let output = files.output_dir(&info.file_id, "task-done").expect("output dir");
        std::fs::create_dir_all(&output).expect("mkdir");
        std::fs::write(output.join("01_Intro.pdf"), SAMPLE).expect("write artifact");
        std::fs::write(output.join("stray.pdf"), SAMPLE).expect("write stray");
        service.insert(done).await;

        let mut running = TaskRecord::new_pending(
            "task-running".into(),
            info.file_id.clone(),
            vec![ChapterSpec::new("Intro", 1, 1)],
        );
        running.start_processing();
        let partial = files.output_dir(&info.file_id, "task-running").expect("output dir");
        std::fs::create_dir_all(&partial).expect("mkdir");
        std::fs::write(partial.join("01_Intro.pdf"), SAMPLE).expect("write partial");
        service.insert(running).await;

        let (status, headers, body) =
            fetch(app.clone(), "/tasks/task-done/artifacts/01_Intro.pdf").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(body, SAMPLE);

        for uri in [
            "/tasks/task-done/artifacts/02_Missing.pdf",
            "/tasks/task-done/artifacts/stray.pdf",
            "/tasks/task-running/artifacts/01_Intro.pdf",
            "/tasks/unknown/artifacts/01_Intro.pdf",
        ] {
            let (status, _, _) = fetch(app.clone(), uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }

        let response = send(
            app,
            Method::GET,
            &format!("/files/{}/chapters", info.file_id),
            Body::empty(),
        )
        .await;
        assert_eq!(
            response.1["tasks"],
            json!([{ "task_id": "task-done", "artifacts": ["01_Intro.pdf", "stray.pdf"] }])
        );
    }

    #[tokio::test]
    async fn cancel_route_reports_outcome() {
        let (app, service, _dir) = router();
        service
            .insert(TaskRecord::new_pending(
                "task-1".into(),
                "file-1".into(),
                vec![ChapterSpec::new("Intro", 1, 1)],
            ))
            .await;

        let cancel = "/tasks/task-1/cancel";
        let response = send(app.clone(), Method::POST, cancel, Body::empty()).await;
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1, json!({ "task_id": "task-1", "cancelled": true }));

        let response = send(app, Method::POST, cancel, Body::empty()).await;
        assert_eq!(response.1["cancelled"], false);
    }

    #[tokio::test]
    async fn delete_file_is_refused_while_tasks_are_unfinished() {
        let (app, service, _dir) = router();
        service
            .insert(TaskRecord::new_pending(
                "task-1".into(),
                "file-1".into(),
                vec![ChapterSpec::new("Intro", 1, 1)],
            ))
            .await;

        let response = send(app.clone(), Method::DELETE, "/files/file-1", Body::empty()).await;
        assert_eq!(response.0, StatusCode::CONFLICT);
        assert_eq!(response.1["error"], "conflict");

        send(app.clone(), Method::POST, "/tasks/task-1/cancel", Body::empty()).await;
        let response = send(app, Method::DELETE, "/files/file-1", Body::empty()).await;
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1, json!({ "file_id": "file-1", "removed_tasks": 1 }));
    }

    #[tokio::test]
    async fn queue_status_reports_counts() {
        let (app, _service, _dir) = router();
        let response = send(app, Method::GET, "/queue/status", Body::empty()).await;
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1["active_workers"], 2);
        assert_eq!(response.1["task_counts"]["total"], 0);
    }

    const SAMPLE: &[u8] = b"%PDF-1.7\n%%EOF\n";

    fn router() -> (Router, Arc<StubTaskService>, TempDir) {
        let (app, service, _files, dir) = router_with_files();
        (app, service, dir)
    }

    fn router_with_files() -> (Router, Arc<StubTaskService>, Arc<LocalFileStorage>, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let files = Arc::new(LocalFileStorage::new(dir.path(), 1024));
        let service = Arc::new(StubTaskService::default());
        let app = create_router(
            Arc::clone(&service),
            files.clone(),
            RouterOptions {
                default_retention: Duration::from_secs(24 * 3600),
                max_upload_bytes: 1024,
            },
        );
        (app, service, files, dir)
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, headers, body.to_vec())
    }

    async fn send(
        app: Router,
        method: Method,
        uri: &str,
        body: Body,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .expect("request"),
            )
            .await
            .expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[derive(Default)]
    struct StubTaskService {
        created: Mutex<Vec<(String, Vec<ChapterSpec>)>>,
        cleanups: Mutex<Vec<Duration>>,
        records: Mutex<HashMap<String, TaskRecord>>,
    }

    impl StubTaskService {
        async fn insert(&self, record: TaskRecord) {
            self.records
                .lock()
                .await
                .insert(record.task_id.clone(), record);
        }
    }

    #[async_trait]
    impl SplitTaskApi for StubTaskService {
        async fn create_task(
            &self,
            file_id: &str,
            chapters: Vec<ChapterSpec>,
        ) -> Result<TaskRecord, TaskError> {
            crate::tasks::validate_chapters(&chapters)?;
            self.created
                .lock()
                .await
                .push((file_id.to_string(), chapters.clone()));
            Ok(TaskRecord::new_pending(
                "task-1".into(),
                file_id.to_string(),
                chapters,
            ))
        }

        async fn get_task(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
            self.records
                .lock()
                .await
                .get(task_id)
                .cloned()
                .ok_or_else(|| TaskError::task_not_found(task_id))
        }

        async fn list_tasks(&self, file_id: Option<&str>) -> Result<Vec<TaskRecord>, TaskError> {
            Ok(self
                .records
                .lock()
                .await
                .values()
                .filter(|record| file_id.is_none_or(|id| record.file_id == id))
                .cloned()
                .collect())
        }

        async fn list_active_tasks(&self) -> Result<Vec<TaskRecord>, TaskError> {
            Ok(Vec::new())
        }

        async fn queue_status(&self) -> Result<QueueStatus, TaskError> {
            Ok(QueueStatus {
                queue_size: 0,
                active_workers: 2,
                processing_tasks: 0,
                task_counts: TaskCounts::default(),
            })
        }

        async fn cancel_task(&self, task_id: &str) -> Result<bool, TaskError> {
            Ok(self
                .records
                .lock()
                .await
                .get_mut(task_id)
                .is_some_and(|record| record.fail(CANCELLED_MESSAGE)))
        }

        async fn cleanup(&self, retention: Duration) -> Result<usize, TaskError> {
            self.cleanups.lock().await.push(retention);
            Ok(0)
        }

        async fn delete_file(&self, file_id: &str) -> Result<usize, TaskError> {
            let mut records = self.records.lock().await;
            if records
                .values()
                .any(|record| record.file_id == file_id && record.status.is_active())
            {
                return Err(TaskError::Conflict(format!("{file_id} is busy")));
            }
            let before = records.len();
            records.retain(|_, record| record.file_id != file_id);
            Ok(before - records.len())
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
    }
}
