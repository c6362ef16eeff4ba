//! Per-request backend session.
//!
//! Every HTTP request names its lab controller and credentials in headers.
//! The middleware resolves them to a pooled [`LabClient`], logs it in, binds
//! it to the request's task for the tool handlers and hands the slot back to
//! the pool when the request is done, whatever the outcome.

use std::future::Future;
use std::sync::Arc;

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tracing::{debug, warn};

use super::context;
use super::protocol::McpError;
use crate::lab_client::{Credentials, LabClientError};
use crate::pool::{redact_url, ClientPool, PoolError};
use crate::server::metrics;

pub const SERVER_URL_HEADER: &str = "x-cml-server-url";
pub const VERIFY_SSL_HEADER: &str = "x-cml-verify-ssl";
pub const AUTHORIZATION_HEADER: &str = "x-authorization";

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("Invalid {header} header: {reason}")]
    InvalidHeader {
        header: &'static str,
        reason: &'static str,
    },

    #[error("Missing target server URL")]
    MissingTarget,

    #[error("Missing X-Authorization header")]
    MissingCredentials,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Authentication to {url} failed: {source}")]
    Unauthorized {
        url: String,
        #[source]
        source: LabClientError,
    },
}

impl From<MiddlewareError> for McpError {
    fn from(err: MiddlewareError) -> Self {
        match err {
            MiddlewareError::InvalidHeader { .. } => McpError::InvalidHeader(err.to_string()),
            MiddlewareError::MissingTarget => McpError::MissingTarget,
            MiddlewareError::MissingCredentials => McpError::Unauthorized(err.to_string()),
            MiddlewareError::Pool(PoolError::UrlNotAllowed(rejection)) => {
                McpError::UrlNotAllowed(rejection.to_string())
            }
            MiddlewareError::Pool(PoolError::TooManyConcurrentRequests { .. }) => {
                McpError::TooManyConcurrentRequests(err.to_string())
            }
            MiddlewareError::Pool(PoolError::ClientCreation { .. }) => {
                McpError::InternalError(err.to_string())
            }
            MiddlewareError::Unauthorized { .. } => McpError::Unauthorized(err.to_string()),
        }
    }
}

/// Target, credentials and TLS preference carried by one request.
///
/// Certificates are only verified when the request asks for it.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub server_url: Option<String>,
    pub credentials: Option<Credentials>,
    pub verify_tls: bool,
}

impl RequestMetadata {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, MiddlewareError> {
        let server_url = header_str(headers, SERVER_URL_HEADER)?
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        let credentials = header_str(headers, AUTHORIZATION_HEADER)?
            .map(parse_basic_auth)
            .transpose()?;

        let verify_tls = header_str(headers, VERIFY_SSL_HEADER)?.is_some_and(parse_flag);

        Ok(Self {
            server_url,
            credentials,
            verify_tls,
        })
    }
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, MiddlewareError> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| MiddlewareError::InvalidHeader {
                header: name,
                reason: "not valid ASCII",
            })
        })
        .transpose()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Decode `Basic base64(username:password)`.
pub fn parse_basic_auth(value: &str) -> Result<Credentials, MiddlewareError> {
    let invalid = |reason| MiddlewareError::InvalidHeader {
        header: "X-Authorization",
        reason,
    };

    let value = value.trim();
    let encoded = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("basic") => rest.trim(),
        _ => return Err(invalid("expected Basic credentials")),
    };

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| invalid("credentials are not valid base64"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid("credentials are not UTF-8"))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| invalid("expected username:password"))?;
    if username.is_empty() {
        return Err(invalid("username is empty"));
    }

    Ok(Credentials::new(username, password))
}

/// Gate in front of the MCP handler in multi-tenant mode.
#[derive(Clone)]
pub struct BackendMiddleware {
    pool: Arc<ClientPool>,
    default_url: Option<String>,
}

impl BackendMiddleware {
    /// `default_url` is used when a request names no server. Credentials
    /// have no default: every request must carry its own.
    pub fn new(pool: Arc<ClientPool>, default_url: Option<String>) -> Self {
        Self { pool, default_url }
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    /// Run `next` with a logged-in client bound to the current task.
    ///
    /// The client's request slot is returned to the pool exactly once for
    /// every request that got one, including when authentication fails,
    /// `next` panics or the returned future is dropped early.
    pub async fn on_request<F, Fut, T>(
        &self,
        metadata: RequestMetadata,
        next: F,
    ) -> Result<T, MiddlewareError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let url = metadata
            .server_url
            .or_else(|| self.default_url.clone())
            .ok_or(MiddlewareError::MissingTarget)?;
        let credentials = metadata
            .credentials
            .ok_or(MiddlewareError::MissingCredentials)?;
        let lease = self
            .pool
            .lease(&url, credentials, metadata.verify_tls)
            .map_err(|err| {
                if matches!(err, PoolError::UrlNotAllowed(_)) {
                    metrics::record_pool_rejection("url_not_allowed");
                }
                warn!("Request to {} failed: {}", redact_url(&url), err);
                err
            })?;
        let client = Arc::clone(lease.client());

        // Credentials may have just changed, so never trust a cached token.
        if let Err(source) = client.reauthenticate().await {
            metrics::record_backend_auth_failure(if source.is_unauthorized() {
                "rejected"
            } else {
                "unreachable"
            });
            warn!(
                "Request to {} failed: authentication error: {}",
                client.base_url(),
                source
            );
            return Err(MiddlewareError::Unauthorized {
                url: client.base_url().to_string(),
                source,
            });
        }

        let output = context::with_client(Arc::clone(&client), next()).await;
        debug!("Request to {} completed", client.base_url());
        drop(lease);
        Ok(output)
    }
}
