mod file_config;

pub use file_config::{CmlConfig, FileConfig, PoolConfig};

use crate::lab_client::{Credentials, DEFAULT_API_TIMEOUT};
use crate::pool::{
    PoolSettings, UrlPolicy, DEFAULT_EVICTION_INTERVAL, DEFAULT_MAX_PER_SERVER, DEFAULT_MAX_SIZE,
    DEFAULT_TTL,
};
use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use regex::Regex;
use std::time::Duration;
use tracing::warn;

/// How MCP messages reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Transport {
    /// Single-tenant, newline-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// Multi-tenant `POST /mcp`.
    Http,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub transport: Transport,
    pub cml_url: Option<String>,
    pub cml_username: Option<String>,
    pub cml_password: Option<String>,
    pub verify_ssl: bool,
    pub bind: String,
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub logging_level: RequestsLoggingLevel,
    pub pool_max_size: usize,
    pub pool_ttl_seconds: u64,
    pub pool_max_per_server: usize,
    pub eviction_interval_seconds: u64,
    pub allowed_urls: Vec<String>,
    pub url_pattern: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            transport: Transport::default(),
            cml_url: None,
            cml_username: None,
            cml_password: None,
            verify_ssl: true,
            bind: server.bind,
            port: server.port,
            metrics_port: None,
            logging_level: server.requests_logging_level,
            pool_max_size: DEFAULT_MAX_SIZE,
            pool_ttl_seconds: DEFAULT_TTL.as_secs(),
            pool_max_per_server: DEFAULT_MAX_PER_SERVER,
            eviction_interval_seconds: DEFAULT_EVICTION_INTERVAL.as_secs(),
            allowed_urls: Vec::new(),
            url_pattern: None,
        }
    }
}

/// Default lab controller connection.
#[derive(Debug, Clone)]
pub struct CmlSettings {
    pub url: Option<String>,
    pub credentials: Option<Credentials>,
    /// Used by the stdio transport only.
    pub verify_ssl: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub transport: Transport,
    pub cml: CmlSettings,
    pub bind: String,
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub logging_level: RequestsLoggingLevel,
    pub pool: PoolSettings,
    pub eviction_interval: Duration,
    pub url_policy: UrlPolicy,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let transport = match file.transport {
            Some(s) => Transport::from_str(&s, true)
                .map_err(|_| anyhow!("Unknown transport in config file: {}", s))?,
            None => cli.transport,
        };

        let cml_file = file.cml.unwrap_or_default();
        let url = cml_file.url.or_else(|| cli.cml_url.clone());
        let username = cml_file.username.or_else(|| cli.cml_username.clone());
        let password = cml_file.password.or_else(|| cli.cml_password.clone());
        let verify_ssl = cml_file.verify_ssl.unwrap_or(cli.verify_ssl);

        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => None,
        };

        if transport == Transport::Stdio && (url.is_none() || credentials.is_none()) {
            bail!("stdio transport requires CML_URL, CML_USERNAME and CML_PASSWORD");
        }

        let bind = file.bind.unwrap_or_else(|| cli.bind.clone());
        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.or(cli.metrics_port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let pool_file = file.pool.unwrap_or_default();
        let max_size = pool_file.max_size.unwrap_or(cli.pool_max_size);
        let ttl_seconds = pool_file.ttl_seconds.unwrap_or(cli.pool_ttl_seconds);
        let max_per_server = pool_file.max_per_server.unwrap_or(cli.pool_max_per_server);
        let eviction_interval_seconds = pool_file
            .eviction_interval_seconds
            .unwrap_or(cli.eviction_interval_seconds);

        if max_size < 1 {
            bail!("Pool max size must be at least 1");
        }
        if max_per_server < 1 {
            bail!("Pool max per server must be at least 1");
        }
        if ttl_seconds < 1 {
            bail!("Pool TTL must be at least 1 second");
        }
        if eviction_interval_seconds < 1 {
            bail!("Pool eviction interval must be at least 1 second");
        }

        let allowed_urls = pool_file
            .allowed_urls
            .unwrap_or_else(|| cli.allowed_urls.clone());
        let allowed_urls: Vec<String> = allowed_urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        let url_pattern = pool_file
            .url_pattern
            .or_else(|| cli.url_pattern.clone())
            .filter(|p| !p.is_empty());

        let pattern = url_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("Invalid URL pattern")?;
        let url_policy =
            UrlPolicy::new(&allowed_urls, pattern).context("Invalid allowed URL")?;

        if transport == Transport::Http {
            if !url_policy.is_restricted() {
                warn!("No URL allowlist or pattern configured: all CML servers are permitted");
            }
            if let Some(url) = &url {
                url_policy
                    .validate(url)
                    .context("Default CML URL is not permitted by the URL policy")?;
            }
        }

        Ok(Self {
            transport,
            cml: CmlSettings {
                url,
                credentials,
                verify_ssl,
            },
            bind,
            port,
            metrics_port,
            logging_level,
            pool: PoolSettings {
                max_size,
                ttl: Duration::from_secs(ttl_seconds),
                max_per_server,
                request_timeout: DEFAULT_API_TIMEOUT,
            },
            eviction_interval: Duration::from_secs(eviction_interval_seconds),
            url_policy,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            bind: self.bind.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
        }
    }
}

/// Parse a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
