//! Test server lifecycle management
//!
//! Each test gets an isolated MCP server and fake lab controller. The MCP
//! server only admits the fake controller's URL.

use super::constants::*;
use super::fake_controller::FakeController;
use cml_mcp_server::mcp::handler::create_mcp_state;
use cml_mcp_server::mcp::BackendMiddleware;
use cml_mcp_server::pool::{ClientPool, PoolSettings, UrlPolicy};
use cml_mcp_server::server::{make_app, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Test server instance
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Direct access to the pool for assertions
    pub pool: Arc<ClientPool>,

    /// The lab controller the server is allowed to reach
    pub controller: FakeController,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with default pool settings
    pub async fn spawn() -> Self {
        Self::spawn_with(PoolSettings::default()).await
    }

    pub async fn spawn_with(settings: PoolSettings) -> Self {
        let controller = FakeController::spawn().await;

        let policy = UrlPolicy::new(&[controller.base_url.clone()], None)
            .expect("Failed to build URL policy");
        let pool = Arc::new(ClientPool::new(settings, policy));
        let backend = Arc::new(BackendMiddleware::new(pool.clone(), None));
        let app = make_app(
            ServerConfig::default(),
            Arc::new(create_mcp_state()),
            backend,
        );

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            pool,
            controller,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling /health
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!("Server failed to become ready within {:?}", timeout);
            }
            if let Ok(response) = client
                .get(format!("{}/health", self.base_url))
                .send()
                .await
            {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Total in-flight requests across the pool.
    #[allow(dead_code)]
    pub fn active_requests(&self) -> usize {
        self.pool.stats().active_requests
    }
}
