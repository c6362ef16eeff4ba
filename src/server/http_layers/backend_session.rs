//! Axum adapter for [`BackendMiddleware`](crate::mcp::BackendMiddleware).

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::mcp::{McpError, McpResponse, RequestMetadata};
use crate::server::metrics;
use crate::server::state::GuardedBackendMiddleware;

/// Reject the request with a JSON-RPC error body and a matching HTTP status.
fn session_error(error: McpError) -> Response {
    metrics::record_mcp_request("session", "rejected");
    let status = error.http_status();
    let retryable = error.is_retryable();

    let mut response = (status, Json(McpResponse::error(None, error))).into_response();
    if retryable {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

/// Resolve, authenticate and bind a lab controller client around the rest
/// of the request.
pub async fn backend_session(
    State(backend): State<GuardedBackendMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    let metadata = match RequestMetadata::from_headers(request.headers()) {
        Ok(metadata) => metadata,
        Err(err) => return session_error(err.into()),
    };

    match backend.on_request(metadata, || next.run(request)).await {
        Ok(response) => response,
        Err(err) => session_error(err.into()),
    }
}
