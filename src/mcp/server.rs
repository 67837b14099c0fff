//! MCP server bootstrap and request dispatch.

use std::{borrow::Cow, sync::Arc};

use crate::mcp::{
    format::{SettingsSnapshot, json_resource_contents, queue_payload, serialize_json, task_error},
    handlers::{
        metrics::{handle_metrics, handle_queue_status},
        split::handle_split,
        tasks::{handle_cancel, handle_cleanup, handle_list_tasks, handle_task_status},
    },
    registry, schemas,
};
use crate::tasks::SplitTaskApi;
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::{
        AnnotateAble, CallToolRequestParam, CallToolResult, ListResourcesResult, ListToolsResult,
        RawResource, ReadResourceRequestParam, ReadResourceResult, Resource, ServerCapabilities,
        ServerInfo, Tool, ToolAnnotations,
    },
};

const QUEUE_URI: &str = "mcp://queue";
const SETTINGS_URI: &str = "mcp://settings";

/// MCP server exposing the split task queue.
#[derive(Clone)]
pub struct SplitterMcpServer {
    tasks: Arc<dyn SplitTaskApi>,
    settings: Arc<SettingsSnapshot>,
    registry: Arc<registry::Registry>,
}

impl SplitterMcpServer {
    /// Create a new MCP server over the supplied task queue.
    pub fn new(tasks: Arc<dyn SplitTaskApi>, settings: SettingsSnapshot) -> Self {
        let mut registry = registry::Registry::new();
        registry.register_resource(QUEUE_URI, resource_queue);
        registry.register_resource(SETTINGS_URI, resource_settings);

        registry.register_tool("split-pdf", tool_split);
        registry.register_tool("task-status", tool_task_status);
        registry.register_tool("list-tasks", tool_list_tasks);
        registry.register_tool("queue-status", tool_queue_status);
        registry.register_tool("cancel-task", tool_cancel);
        registry.register_tool("cleanup-tasks", tool_cleanup);
        registry.register_tool("metrics", tool_metrics);

        Self {
            tasks,
            settings: Arc::new(settings),
            registry: Arc::new(registry),
        }
    }

    fn describe_tools(&self) -> Vec<Tool> {
        let task_id_schema = Arc::new(schemas::task_id_input_schema());
        let empty_schema = Arc::new(schemas::empty_object_schema());
        vec![
            Tool {
                name: Cow::Borrowed("split-pdf"),
                title: Some("Split PDF".to_string()),
                description: Some(Cow::Borrowed(
                    "Queue a split of an uploaded PDF into one file per chapter; poll task-status for progress.",
                )),
                input_schema: Arc::new(schemas::split_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Split PDF")
                        .destructive(false)
                        .idempotent(false)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("task-status"),
                title: Some("Task Status".to_string()),
                description: Some(Cow::Borrowed(
                    "Return status, progress and download links of a split task.",
                )),
                input_schema: task_id_schema.clone(),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Task Status")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("list-tasks"),
                title: Some("List Tasks".to_string()),
                description: Some(Cow::Borrowed(
                    "List split tasks newest first, or only unfinished ones in queue order.",
                )),
                input_schema: Arc::new(schemas::list_tasks_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("List Tasks")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("queue-status"),
                title: Some("Queue Status".to_string()),
                description: Some(Cow::Borrowed(
                    "Check queue depth, busy workers and task counts per status.",
                )),
                input_schema: empty_schema.clone(),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Queue Status")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("cancel-task"),
                title: Some("Cancel Task".to_string()),
                description: Some(Cow::Borrowed(
                    "Cancel a pending or processing task; finished tasks are left untouched.",
                )),
                input_schema: task_id_schema,
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Cancel Task")
                        .destructive(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("cleanup-tasks"),
                title: Some("Clean Up Tasks".to_string()),
                description: Some(Cow::Borrowed(
                    "Delete finished tasks older than the retention window.",
                )),
                input_schema: Arc::new(schemas::cleanup_input_schema(
                    self.settings.retention_hours,
                )),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Clean Up Tasks")
                        .destructive(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("metrics"),
                title: Some("Metrics Snapshot".to_string()),
                description: Some(Cow::Borrowed(
                    "Check task throughput, cancellations and persistence failures at a glance.",
                )),
                input_schema: empty_schema,
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Metrics Snapshot")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
        ]
    }

    fn describe_resources(&self) -> Vec<Resource> {
        let mut queue = RawResource::new(QUEUE_URI, "queue");
        queue.description = Some("Live queue depth, worker activity and task counts".into());

        let mut settings = RawResource::new(SETTINGS_URI, "settings");
        settings.description =
            Some("Effective worker count, retention window and recovery policy".into());

        vec![queue.no_annotation(), settings.no_annotation()]
    }
}

fn resource_queue(
    server: &SplitterMcpServer,
    _request: ReadResourceRequestParam,
) -> registry::ResourceFuture {
    let tasks = server.tasks.clone();
    Box::pin(async move {
        let status = tasks.queue_status().await.map_err(task_error)?;
        Ok(ReadResourceResult {
            contents: vec![json_resource_contents(
                QUEUE_URI,
                serialize_json(&queue_payload(&status), QUEUE_URI),
            )],
        })
    })
}

fn resource_settings(
    server: &SplitterMcpServer,
    _request: ReadResourceRequestParam,
) -> registry::ResourceFuture {
    let settings = server.settings.clone();
    Box::pin(async move {
        Ok(ReadResourceResult {
            contents: vec![json_resource_contents(
                SETTINGS_URI,
                serialize_json(settings.as_ref(), SETTINGS_URI),
            )],
        })
    })
}

fn tool_split(server: &SplitterMcpServer, request: CallToolRequestParam) -> registry::ToolFuture {
    let tasks = server.tasks.clone();
    Box::pin(async move { handle_split(&tasks, request.arguments).await })
}

fn tool_task_status(
    server: &SplitterMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let tasks = server.tasks.clone();
    Box::pin(async move { handle_task_status(&tasks, request.arguments).await })
}

fn tool_list_tasks(
    server: &SplitterMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let tasks = server.tasks.clone();
    Box::pin(async move { handle_list_tasks(&tasks, request.arguments).await })
}

fn tool_queue_status(
    server: &SplitterMcpServer,
    _request: CallToolRequestParam,
) -> registry::ToolFuture {
    let tasks = server.tasks.clone();
    Box::pin(async move { handle_queue_status(&tasks).await })
}

fn tool_cancel(server: &SplitterMcpServer, request: CallToolRequestParam) -> registry::ToolFuture {
    let tasks = server.tasks.clone();
    Box::pin(async move { handle_cancel(&tasks, request.arguments).await })
}

fn tool_cleanup(server: &SplitterMcpServer, request: CallToolRequestParam) -> registry::ToolFuture {
    let tasks = server.tasks.clone();
    let default_hours = server.settings.retention_hours;
    Box::pin(async move { handle_cleanup(&tasks, request.arguments, default_hours).await })
}

fn tool_metrics(
    server: &SplitterMcpServer,
    _request: CallToolRequestParam,
) -> registry::ToolFuture {
    let tasks = server.tasks.clone();
    Box::pin(async move { handle_metrics(&tasks).await })
}

impl ServerHandler for SplitterMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut implementation = rmcp::model::Implementation::from_build_env();
        implementation.name = "chapter-splitter".to_string();
        implementation.title = Some("Chapter Splitter MCP".to_string());
        implementation.version = env!("CARGO_PKG_VERSION").to_string();

        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: implementation,
            instructions: Some(
                "Split uploaded PDFs into per-chapter files. Call split-pdf with a file_id and chapter page ranges, poll task-status until the task completes, then use its download links.".into(),
            ),
            ..ServerInfo::default()
        }
    }

    fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        let resources = self.describe_resources();
        std::future::ready(Ok(ListResourcesResult::with_all_items(resources)))
    }

    fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = self.describe_tools();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move {
            if let Some(handler) = self.registry.resources.get(request.uri.as_str()) {
                return handler(self, request).await;
            }

            Err(McpError::invalid_params(
                format!("Unknown resource URI: {}", request.uri),
                None,
            ))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            if let Some(handler) = self.registry.tools.get(request.name.as_ref()) {
                return handler(self, request).await;
            }

            Err(McpError::invalid_params(
                format!("Unknown tool: {}", request.name),
                None,
            ))
        }
    }
}
