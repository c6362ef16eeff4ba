//! MCP Tools
//!
//! Thin wrappers over the lab controller REST API. Every tool resolves its
//! client through [`ToolContext::client`], so the same handlers serve both
//! the pooled HTTP mode and the single-tenant stdio mode.

pub mod labs;
pub mod links;
pub mod nodes;
pub mod system;
pub mod users;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use super::context::ToolContext;
use super::protocol::{McpError, ToolsCallResult};
use super::registry::{McpRegistry, ToolResult};
use crate::lab_client::LabClientError;

/// Register all tools with the registry
pub fn register_all_tools(registry: &mut McpRegistry) {
    system::register_tools(registry);
    labs::register_tools(registry);
    nodes::register_tools(registry);
    links::register_tools(registry);
    users::register_tools(registry);
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, McpError> {
    serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))
}

/// Accept an object argument either as JSON or as a JSON-encoded string;
/// some clients send the latter.
fn object_arg(value: Value) -> Result<Value, McpError> {
    let value = match value {
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|e| McpError::InvalidParams(format!("expected a JSON object: {}", e)))?,
        other => other,
    };
    if !value.is_object() {
        return Err(McpError::InvalidParams("expected a JSON object".to_string()));
    }
    Ok(value)
}

fn json_result<T: Serialize>(value: &T) -> ToolResult {
    ToolsCallResult::json(value).map_err(|e| McpError::InternalError(e.to_string()))
}

/// Backend failures are reported to the model as tool errors, not protocol errors.
fn backend_failure(action: &str, err: LabClientError) -> ToolResult {
    error!("Error {}: {}", action, err);
    Ok(ToolsCallResult::error(err.to_string()))
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

/// Run a backend call and turn its outcome into a tool result.
async fn run<F, Fut, T>(ctx: &ToolContext, action: &str, call: F) -> ToolResult
where
    F: FnOnce(std::sync::Arc<crate::lab_client::LabClient>) -> Fut,
    Fut: std::future::Future<Output = Result<T, LabClientError>>,
    T: Serialize,
{
    let client = ctx.client()?;
    match call(client).await {
        Ok(value) => json_result(&value),
        Err(err) => backend_failure(action, err),
    }
}
