//! Tool handlers for the MCP server.

use rmcp::{ErrorData as McpError, model::JsonObject};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod metrics;
pub mod split;
pub mod tasks;

/// Parse structured arguments supplied to a tool invocation.
pub(crate) fn parse_arguments<T: DeserializeOwned>(
    arguments: Option<JsonObject>,
) -> Result<T, McpError> {
    let value = arguments
        .map(Value::Object)
        .unwrap_or_else(|| Value::Object(JsonObject::new()));
    serde_json::from_value(value)
        .map_err(|err| McpError::invalid_params(format!("Invalid arguments: {err}"), None))
}
