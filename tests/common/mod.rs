//! Common test infrastructure
//!
//! End-to-end tests run the MCP server against a fake lab controller, both
//! on ephemeral ports. Tests should only import from this module.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient, ADMIN_USER, ADMIN_PASS};
//!
//! #[tokio::test]
//! async fn test_status() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(&server).with_credentials(ADMIN_USER, ADMIN_PASS);
//!
//!     let response = client.call_tool("get_cml_status", serde_json::json!({})).await;
//!     assert_eq!(response.status(), reqwest::StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod fake_controller;
mod server;

// Public API - this is what tests import
pub use client::{tool_text, TestClient};
pub use constants::*;
#[allow(unused_imports)]
pub use fake_controller::FakeController;
pub use server::TestServer;
