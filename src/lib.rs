//! CML MCP Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod lab_client;
pub mod mcp;
pub mod pool;
pub mod server;

// Re-export commonly used types for convenience
pub use lab_client::{Credentials, LabClient};
pub use pool::{ClientPool, PoolSettings, UrlPolicy};
pub use server::{run_server, RequestsLoggingLevel};
