use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cml_mcp_server::config::{AppConfig, CliConfig, FileConfig, Transport};
use cml_mcp_server::lab_client::LabClient;
use cml_mcp_server::mcp::context::ToolContext;
use cml_mcp_server::mcp::handler::create_mcp_state;
use cml_mcp_server::mcp::{stdio, BackendMiddleware};
use cml_mcp_server::pool::{
    run_eviction_loop, ClientPool, DEFAULT_EVICTION_INTERVAL, DEFAULT_MAX_PER_SERVER,
    DEFAULT_MAX_SIZE, DEFAULT_TTL,
};
use cml_mcp_server::server::{metrics, run_server, RequestsLoggingLevel};

#[derive(Parser, Debug)]
#[command(version, about = "MCP server for Cisco Modeling Labs")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// How MCP clients connect.
    #[clap(long, env = "CML_MCP_TRANSPORT", value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Default CML server URL. Required for stdio; fallback target in HTTP mode.
    #[clap(long, env = "CML_URL")]
    pub cml_url: Option<String>,

    #[clap(long, env = "CML_USERNAME")]
    pub cml_username: Option<String>,

    #[clap(long, env = "CML_PASSWORD", hide_env_values = true)]
    pub cml_password: Option<String>,

    /// Verify the TLS certificate in stdio mode. HTTP requests choose with X-CML-Verify-SSL.
    #[clap(
        long,
        env = "CML_VERIFY_SSL",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub verify_ssl: bool,

    /// Address to listen on in HTTP mode.
    #[clap(long, env = "CML_MCP_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// The port to listen on in HTTP mode.
    #[clap(short, long, env = "CML_MCP_PORT", default_value_t = 9000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long)]
    pub metrics_port: Option<u16>,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Maximum number of pooled clients.
    #[clap(long, env = "CML_POOL_MAX_SIZE", default_value_t = DEFAULT_MAX_SIZE)]
    pub pool_max_size: usize,

    /// Seconds an idle pooled client is kept.
    #[clap(long, env = "CML_POOL_TTL_SECONDS", default_value_t = DEFAULT_TTL.as_secs())]
    pub pool_ttl_seconds: u64,

    /// Maximum concurrent requests per CML server.
    #[clap(long, env = "CML_POOL_MAX_PER_SERVER", default_value_t = DEFAULT_MAX_PER_SERVER)]
    pub pool_max_per_server: usize,

    /// Interval in seconds between background sweeps of expired clients.
    #[clap(long, default_value_t = DEFAULT_EVICTION_INTERVAL.as_secs())]
    pub eviction_interval_seconds: u64,

    /// CML server URLs clients may target, comma separated.
    #[clap(long, env = "CML_ALLOWED_URLS", value_delimiter = ',')]
    pub allowed_urls: Vec<String>,

    /// Regex that target URLs must match from their start.
    #[clap(long, env = "CML_URL_PATTERN")]
    pub url_pattern: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            transport: self.transport,
            cml_url: self.cml_url.clone(),
            cml_username: self.cml_username.clone(),
            cml_password: self.cml_password.clone(),
            verify_ssl: self.verify_ssl,
            bind: self.bind.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            pool_max_size: self.pool_max_size,
            pool_ttl_seconds: self.pool_ttl_seconds,
            pool_max_per_server: self.pool_max_per_server,
            eviction_interval_seconds: self.eviction_interval_seconds,
            allowed_urls: self.allowed_urls.clone(),
            url_pattern: self.url_pattern.clone(),
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;

    // stdout carries the protocol in stdio mode.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let mcp_state = Arc::new(create_mcp_state());

    match config.transport {
        Transport::Stdio => {
            let (Some(url), Some(credentials)) = (&config.cml.url, &config.cml.credentials)
            else {
                anyhow::bail!("stdio transport requires a CML URL and credentials");
            };
            let client = Arc::new(LabClient::new(
                url,
                credentials.clone(),
                config.cml.verify_ssl,
                config.pool.request_timeout,
            )?);
            let result = stdio::run_stdio(&mcp_state, ToolContext::new(Some(client.clone()))).await;
            client.close();
            result
        }
        Transport::Http => {
            let pool = Arc::new(ClientPool::new(
                config.pool.clone(),
                config.url_policy.clone(),
            ));
            let backend = Arc::new(BackendMiddleware::new(pool.clone(), config.cml.url.clone()));

            let shutdown = CancellationToken::new();
            tokio::spawn(run_eviction_loop(
                pool,
                config.eviction_interval,
                shutdown.clone(),
            ));
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    shutdown_signal().await;
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
            });

            run_server(config.server_config(), mcp_state, backend, shutdown.clone()).await?;
            shutdown.cancel();
            Ok(())
        }
    }
}
