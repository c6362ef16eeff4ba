//! MCP Request Handler
//!
//! JSON-RPC dispatch shared by the HTTP and stdio transports.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error, info};

use super::context::ToolContext;
use super::protocol::{
    methods, InitializeParams, InitializeResult, McpError, McpRequest, McpResponse, PingResult,
    ServerCapabilities, ServerInfo, ToolsCallParams, ToolsCapability, ToolsListResult,
    MCP_PROTOCOL_VERSION,
};
use super::registry::McpRegistry;
use crate::server::metrics;
use crate::server::state::GuardedMcpState;

pub const SERVER_NAME: &str = "cml-mcp";

/// State shared across MCP requests
pub struct McpState {
    pub registry: Arc<McpRegistry>,
    pub server_version: String,
}

/// Per-connection protocol state.
#[derive(Debug, Default)]
pub struct SessionState {
    pub initialized: bool,
}

impl SessionState {
    /// Each HTTP request stands alone, so there is no handshake to wait for.
    pub fn stateless() -> Self {
        Self { initialized: true }
    }
}

/// `POST /mcp`: one JSON-RPC message in, one response (or 202) out.
pub async fn mcp_handler(State(mcp_state): State<GuardedMcpState>, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    let mut session = SessionState::stateless();

    match handle_message(&text, &ToolContext::default(), &mcp_state, &mut session).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Handle a single raw MCP message
pub async fn handle_message(
    text: &str,
    ctx: &ToolContext,
    mcp_state: &McpState,
    session: &mut SessionState,
) -> Option<McpResponse> {
    let request: McpRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            metrics::record_mcp_request("unknown", "parse_error");
            return Some(McpResponse::error(
                None,
                McpError::ParseError(e.to_string()),
            ));
        }
    };

    handle_request(request, ctx, mcp_state, session).await
}

/// Dispatch a parsed request. Notifications never produce a response.
pub async fn handle_request(
    request: McpRequest,
    ctx: &ToolContext,
    mcp_state: &McpState,
    session: &mut SessionState,
) -> Option<McpResponse> {
    let method = request.method.clone();

    let Some(request_id) = request.id.clone() else {
        match method.as_str() {
            methods::INITIALIZED => session.initialized = true,
            methods::CANCELLED => debug!("Client cancelled a request"),
            other => debug!("Ignoring notification {}", other),
        }
        return None;
    };

    let result = match method.as_str() {
        methods::INITIALIZE => handle_initialize(&request, mcp_state, session),
        methods::PING => handle_ping(),
        methods::TOOLS_LIST if !session.initialized => not_initialized(),
        methods::TOOLS_LIST => handle_tools_list(mcp_state),
        methods::TOOLS_CALL if !session.initialized => not_initialized(),
        methods::TOOLS_CALL => handle_tools_call(&request, ctx, mcp_state).await,
        other => Err(McpError::MethodNotFound(other.to_string())),
    };

    Some(match result {
        Ok(value) => {
            metrics::record_mcp_request(&method, "ok");
            McpResponse::success(request_id, value)
        }
        Err(error) => {
            metrics::record_mcp_request(&method, "error");
            McpResponse::error(Some(request_id), error)
        }
    })
}

fn not_initialized() -> Result<serde_json::Value, McpError> {
    Err(McpError::InvalidRequest("Not initialized".to_string()))
}

fn handle_initialize(
    request: &McpRequest,
    mcp_state: &McpState,
    session: &mut SessionState,
) -> Result<serde_json::Value, McpError> {
    let params: Option<InitializeParams> = request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    if let Some(params) = &params {
        info!(
            "MCP client {} {} connected (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );
    }

    session.initialized = true;

    let result = InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability { list_changed: None },
        },
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: mcp_state.server_version.clone(),
        },
        instructions: Some(
            "Tools operate on the Cisco Modeling Labs server selected by the \
             X-CML-Server-URL header, or on the configured server."
                .to_string(),
        ),
    };

    serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
}

fn handle_ping() -> Result<serde_json::Value, McpError> {
    serde_json::to_value(PingResult {}).map_err(|e| McpError::InternalError(e.to_string()))
}

fn handle_tools_list(mcp_state: &McpState) -> Result<serde_json::Value, McpError> {
    let result = ToolsListResult {
        tools: mcp_state.registry.tool_definitions(),
    };

    serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
}

async fn handle_tools_call(
    request: &McpRequest,
    ctx: &ToolContext,
    mcp_state: &McpState,
) -> Result<serde_json::Value, McpError> {
    let params: ToolsCallParams = request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| McpError::InvalidParams(e.to_string()))?
        .ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))?;

    let tool = mcp_state
        .registry
        .get_tool(&params.name)
        .ok_or_else(|| McpError::MethodNotFound(format!("Unknown tool: {}", params.name)))?;

    let arguments = params.arguments.unwrap_or(serde_json::json!({}));
    let result = (tool.handler)(ctx.clone(), arguments)
        .await
        .inspect_err(|e| {
            if *e == McpError::NoConnectionAvailable {
                error!("Tool {} ran without a bound CML client", params.name);
            }
        })?;

    serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
}

/// Create the MCP state with all tools registered
pub fn create_mcp_state() -> McpState {
    let mut registry = McpRegistry::new();
    super::tools::register_all_tools(&mut registry);

    info!("MCP registry initialized with {} tools", registry.tool_count());

    McpState {
        registry: Arc::new(registry),
        server_version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
    }
}
