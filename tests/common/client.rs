//! HTTP client for driving the MCP endpoint in tests

use super::server::TestServer;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Response;
use serde_json::{json, Value};

pub struct TestClient {
    base_url: String,
    target: Option<String>,
    authorization: Option<String>,
    http: reqwest::Client,
}

#[allow(dead_code)]
impl TestClient {
    /// A client targeting the server's fake controller, with no credentials.
    pub fn new(server: &TestServer) -> Self {
        Self {
            base_url: server.base_url.clone(),
            target: Some(server.controller.base_url.clone()),
            authorization: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_target(mut self, url: Option<&str>) -> Self {
        self.target = url.map(str::to_string);
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{}:{}", username, password));
        self.authorization = Some(format!("Basic {}", encoded));
        self
    }

    pub fn with_raw_authorization(mut self, value: &str) -> Self {
        self.authorization = Some(value.to_string());
        self
    }

    /// POST a raw JSON-RPC message to /mcp.
    pub async fn post(&self, message: Value) -> Response {
        let mut request = self
            .http
            .post(format!("{}/mcp", self.base_url))
            .json(&message);
        if let Some(target) = &self.target {
            request = request.header("X-CML-Server-URL", target);
        }
        if let Some(authorization) = &self.authorization {
            request = request.header("X-Authorization", authorization);
        }
        request.send().await.expect("Request failed")
    }

    pub async fn list_tools(&self) -> Response {
        self.post(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Response {
        self.post(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        }))
        .await
    }

    pub async fn health(&self) -> Response {
        self.http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Request failed")
    }
}

/// The text content of a successful `tools/call` response body.
#[allow(dead_code)]
pub fn tool_text(body: &Value) -> &str {
    body["result"]["content"][0]["text"]
        .as_str()
        .expect("tool result has no text content")
}
