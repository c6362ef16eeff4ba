//! MCP (Model Context Protocol) Server
//!
//! Exposes the lab controller REST API as MCP tools.
//!
//! ## Architecture
//!
//! - Transports: `POST /mcp` (multi-tenant) and stdio (single-tenant)
//! - Backend: per-request [`middleware::BackendMiddleware`] binds a pooled client
//! - Tools: read, write and destructive operations on labs, nodes and links

pub mod context;
pub mod handler;
pub mod middleware;
pub mod protocol;
pub mod registry;
pub mod stdio;
pub mod tools;

pub use handler::mcp_handler;
pub use middleware::{BackendMiddleware, RequestMetadata};
pub use protocol::{McpError, McpRequest, McpResponse};
pub use registry::McpRegistry;
