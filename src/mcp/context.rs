//! MCP Tool Execution Context
//!
//! Tools find their lab controller client here. In HTTP mode the request
//! middleware binds a pooled client to the task serving the request; in
//! stdio mode a single process-wide client is used instead.

use std::future::Future;
use std::sync::Arc;

use super::protocol::McpError;
use crate::lab_client::LabClient;

tokio::task_local! {
    static CURRENT_CLIENT: Arc<LabClient>;
}

/// Run `fut` with `client` bound as the current client.
///
/// The binding is visible only while `fut` is being polled and is removed
/// when it completes or is dropped.
pub async fn with_client<F>(client: Arc<LabClient>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_CLIENT.scope(client, fut).await
}

/// The client bound to the current task, if any.
pub fn current_client() -> Option<Arc<LabClient>> {
    CURRENT_CLIENT.try_with(Arc::clone).ok()
}

/// Context provided to tool handlers during execution
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Single-tenant fallback used when no request-bound client exists.
    pub default_client: Option<Arc<LabClient>>,
}

impl ToolContext {
    pub fn new(default_client: Option<Arc<LabClient>>) -> Self {
        Self { default_client }
    }

    /// The request-bound client, else the process-wide default.
    pub fn client(&self) -> Result<Arc<LabClient>, McpError> {
        current_client()
            .or_else(|| self.default_client.clone())
            .ok_or(McpError::NoConnectionAvailable)
    }
}
