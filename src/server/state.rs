use axum::extract::FromRef;
use std::sync::Arc;

use crate::mcp::handler::McpState;
use crate::mcp::BackendMiddleware;
use crate::pool::ClientPool;

use super::ServerConfig;

pub type GuardedMcpState = Arc<McpState>;
pub type GuardedBackendMiddleware = Arc<BackendMiddleware>;
pub type GuardedClientPool = Arc<ClientPool>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub mcp_state: GuardedMcpState,
    pub backend: GuardedBackendMiddleware,
}

impl ServerState {
    pub fn pool(&self) -> GuardedClientPool {
        Arc::clone(self.backend.pool())
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedMcpState {
    fn from_ref(input: &ServerState) -> Self {
        input.mcp_state.clone()
    }
}

impl FromRef<ServerState> for GuardedBackendMiddleware {
    fn from_ref(input: &ServerState) -> Self {
        input.backend.clone()
    }
}

impl FromRef<ServerState> for GuardedClientPool {
    fn from_ref(input: &ServerState) -> Self {
        input.pool()
    }
}
