use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::LabClientError;

/// Per-request timeout applied to every call against the controller.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

const API_PREFIX: &str = "/api/v0";

/// Username and password used to obtain a bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

struct CachedToken {
    value: String,
    acquired_at: Instant,
}

/// A logical connection to one lab controller.
///
/// Credentials are mutable so a pooled client can be reused by requests
/// carrying different users. The bearer token is cached and shared by all
/// concurrent users of the same client.
pub struct LabClient {
    http: reqwest::Client,
    base_url: String,
    api_base: String,
    verify_tls: bool,
    credentials: RwLock<Credentials>,
    token: RwLock<Option<CachedToken>>,
    closed: AtomicBool,
}

impl LabClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        verify_tls: bool,
        timeout: Duration,
    ) -> Result<Self, LabClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let api_base = format!("{}{}", base_url, API_PREFIX);

        Ok(Self {
            http,
            base_url,
            api_base,
            verify_tls,
            credentials: RwLock::new(credentials),
            token: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn username(&self) -> String {
        self.credentials().username
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the credentials used for the next login. Last writer wins.
    pub fn set_credentials(&self, credentials: Credentials) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    pub fn has_token(&self) -> bool {
        self.bearer_token().is_some()
    }

    /// When the currently cached token was obtained, if any.
    pub fn token_acquired_at(&self) -> Option<Instant> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|token| token.acquired_at)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the client closed. Subsequent calls fail with [`LabClientError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear_token();
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Obtain a fresh bearer token with the current credentials.
    pub async fn login(&self) -> Result<(), LabClientError> {
        self.ensure_open()?;
        let credentials = self.credentials();

        let response = self
            .http
            .post(format!("{}/authenticate", self.api_base))
            .json(&json!({
                "username": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Login as {} on {} rejected with status {}",
                credentials.username, self.base_url, status
            );
            return Err(LabClientError::Authentication {
                status: status.as_u16(),
            });
        }

        let token: String = response.json().await?;
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(CachedToken {
            value: token,
            acquired_at: Instant::now(),
        });
        debug!("Logged in to {} as {}", self.base_url, credentials.username);
        Ok(())
    }

    /// Validate the cached token, logging in again if it is missing or stale.
    pub async fn check_authentication(&self) -> Result<(), LabClientError> {
        self.ensure_open()?;

        if let Some(token) = self.bearer_token() {
            let response = self
                .http
                .get(format!("{}/authok", self.api_base))
                .bearer_auth(token)
                .send()
                .await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                debug!("Cached token for {} is no longer valid", self.base_url);
                self.clear_token();
            }
        }

        if !self.has_token() {
            self.login().await?;
        }
        Ok(())
    }

    /// Drop any cached token and log in with the current credentials.
    pub async fn reauthenticate(&self) -> Result<(), LabClientError> {
        self.clear_token();
        self.login().await
    }

    /// Whether the logged-in user has administrator rights on the controller.
    pub async fn is_admin(&self) -> Result<bool, LabClientError> {
        let username = urlencoding::encode(&self.username()).into_owned();
        let user_id = self
            .get(&format!("/users/{}/id", username))
            .await?
            .map(serde_json::from_value::<String>)
            .transpose()?
            .unwrap_or_default();

        let user = self
            .get(&format!("/users/{}", urlencoding::encode(&user_id)))
            .await?;
        Ok(user
            .and_then(|user| user.get("admin").and_then(Value::as_bool))
            .unwrap_or(false))
    }

    // ========================================================================
    // HTTP verbs
    // ========================================================================

    pub async fn get(&self, path: &str) -> Result<Option<Value>, LabClientError> {
        self.request(Method::GET, path, &[], None).await
    }

    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, LabClientError> {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Option<Value>, LabClientError> {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn post_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &Value,
    ) -> Result<Option<Value>, LabClientError> {
        self.request(Method::POST, path, query, Some(body)).await
    }

    pub async fn put(&self, path: &str) -> Result<Option<Value>, LabClientError> {
        self.request(Method::PUT, path, &[], None).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Option<Value>, LabClientError> {
        self.request(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Option<Value>, LabClientError> {
        self.request(Method::DELETE, path, &[], None).await
    }

    /// GET a non-JSON resource, such as a topology export.
    pub async fn get_text(&self, path: &str) -> Result<String, LabClientError> {
        let response = self.send(Method::GET, path, &[], None).await?;
        Ok(error_for_status(response).await?.text().await?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, LabClientError> {
        let response = self.send(method, path, query, body).await?;
        read_json(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response, LabClientError> {
        self.check_authentication().await?;
        let token = self
            .bearer_token()
            .ok_or(LabClientError::Authentication { status: 401 })?;

        let mut builder = self
            .http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(token);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }

    fn ensure_open(&self) -> Result<(), LabClientError> {
        if self.is_closed() {
            return Err(LabClientError::Closed(self.base_url.clone()));
        }
        Ok(())
    }

    fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|token| token.value.clone())
    }

    fn clear_token(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

async fn error_for_status(response: Response) -> Result<Response, LabClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LabClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

async fn read_json(response: Response) -> Result<Option<Value>, LabClientError> {
    let response = error_for_status(response).await?;
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&text)?))
}

impl fmt::Debug for LabClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabClient")
            .field("base_url", &self.base_url)
            .field("verify_tls", &self.verify_tls)
            .field("username", &self.username())
            .field("has_token", &self.has_token())
            .field("closed", &self.is_closed())
            .finish()
    }
}
