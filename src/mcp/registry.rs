use std::{collections::HashMap, future::Future, pin::Pin};

use rmcp::ErrorData as McpError;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ReadResourceRequestParam, ReadResourceResult,
};

use super::server::SplitterMcpServer;

pub type ResourceFuture =
    Pin<Box<dyn Future<Output = Result<ReadResourceResult, McpError>> + Send>>;
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<CallToolResult, McpError>> + Send>>;

pub type ResourceHandler = fn(&SplitterMcpServer, ReadResourceRequestParam) -> ResourceFuture;
pub type ToolHandler = fn(&SplitterMcpServer, CallToolRequestParam) -> ToolFuture;

/// Registry mapping resource URIs and tool names to handler functions.
#[derive(Default)]
pub struct Registry {
    pub resources: HashMap<&'static str, ResourceHandler>,
    pub tools: HashMap<&'static str, ToolHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered tool names in sorted order.
    #[cfg(test)]
    pub fn tool_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn register_resource(&mut self, uri: &'static str, handler: ResourceHandler) {
        self.resources.insert(uri, handler);
    }

    pub fn register_tool(&mut self, name: &'static str, handler: ToolHandler) {
        self.tools.insert(name, handler);
    }
}
