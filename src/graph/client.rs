//! Microsoft Graph HTTP client with secret token handling and safe logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Graph requests.
const CLIENT_USER_AGENT: &str = concat!("app-inventory/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default Graph endpoint.
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "client_secret",
    "code",
    "token",
    "$skiptoken",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/v1.0/servicePrincipals`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/v1.0/servicePrincipals?$top=999&$skiptoken=***`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// GraphCredentials
// ─────────────────────────────────────────────────────────────────────────────

/// Endpoint and bearer token for Graph access.
///
/// The token is wrapped in `SecretString` so it cannot leak through `Debug`.
/// Acquiring the token is the caller's business.
#[derive(Clone)]
pub struct GraphCredentials {
    /// Graph root URL (e.g., "https://graph.microsoft.com")
    pub graph_url: String,
    /// OAuth access token
    pub access_token: SecretString,
}

impl std::fmt::Debug for GraphCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCredentials")
            .field("graph_url", &self.graph_url)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// The result never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph error body
// ─────────────────────────────────────────────────────────────────────────────

/// Graph wraps every error in `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct WireErrorEnvelope {
    pub error: WireGraphError,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireGraphError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// GraphClient
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated request-issuing handle for Microsoft Graph.
///
/// Cheap to clone; clones share the connection pool and credentials.
#[derive(Clone)]
pub struct GraphClient {
    /// The underlying HTTP client.
    http: reqwest::Client,
    /// Parsed Graph root, used for joining paths and checking link origins.
    base: Url,
    /// Bearer token.
    access_token: Arc<SecretString>,
    /// Controls URL sanitization for logging.
    logging_mode: LoggingMode,
}

impl GraphClient {
    /// Creates a client with the default request timeout.
    pub fn new(creds: GraphCredentials) -> Result<Self, AppError> {
        Self::with_timeout(creds, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// - `AppError::NotAuthenticated` if the access token is empty
    /// - `AppError::InvalidConfig` if the Graph URL does not parse
    /// - `AppError::Internal` if the HTTP client fails to initialize
    pub fn with_timeout(creds: GraphCredentials, timeout: Duration) -> Result<Self, AppError> {
        if creds.access_token.expose_secret().trim().is_empty() {
            return Err(AppError::NotAuthenticated);
        }

        let base = Url::parse(&creds.graph_url)
            .map_err(|_| AppError::InvalidConfig("Invalid Graph URL".to_string()))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(AppError::InvalidConfig(
                "Graph URL must be an http(s) URL".to_string(),
            ));
        }

        Ok(Self {
            http: build_http_client(timeout)?,
            base,
            access_token: Arc::new(creds.access_token),
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Builds a full URL by joining a path (or an absolute link) with the
    /// Graph root.
    ///
    /// # Errors
    ///
    /// - `AppError::Internal` if the path cannot be joined
    /// - `AppError::GraphError` if an absolute link points at another origin
    pub fn build_url(&self, path: &str) -> Result<Url, AppError> {
        let url = self
            .base
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))?;

        if url.origin() != self.base.origin() {
            warn!("[GRAPH] Refusing to follow link to a foreign origin");
            return Err(AppError::GraphError(
                "Server returned a link outside the Graph endpoint".to_string(),
            ));
        }

        Ok(url)
    }

    /// Executes an authenticated request and maps non-success statuses to
    /// `AppError`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionExpired` - 401 from Graph
    /// - `AppError::RateLimited` - 429 from Graph
    /// - `AppError::GraphError` - any other non-2xx status
    /// - `AppError::ConnectionFailed` - network error
    pub async fn request_authed(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, AppError> {
        let response = self.execute_authed_request(method, url, body).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(error_from_response(response, status).await)
    }

    /// Executes a single authenticated request with timing and logging.
    ///
    /// Never logs the Authorization header, bodies, or raw URLs.
    async fn execute_authed_request(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);

        let mut request = self
            .http
            .request(method.clone(), url.as_str())
            .bearer_auth(self.access_token.expose_secret());

        if let Some(body_bytes) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body_bytes);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let status = response.status();
                let request_id = response
                    .headers()
                    .get("request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                info!(
                    "[GRAPH] {} {} {} {}ms {}",
                    method,
                    sanitized_url,
                    status.as_u16(),
                    duration_ms,
                    request_id
                );

                Ok(response)
            }
            Err(_) => {
                // The reqwest error may embed the full URL, so it is not logged.
                info!(
                    "[GRAPH] {} {} FAILED {}ms",
                    method, sanitized_url, duration_ms
                );
                Err(AppError::ConnectionFailed(
                    "Connection to Microsoft Graph failed".to_string(),
                ))
            }
        }
    }
}

/// Maps a non-success response to the matching `AppError`.
async fn error_from_response(response: reqwest::Response, status: StatusCode) -> AppError {
    if status == StatusCode::UNAUTHORIZED {
        warn!("[GRAPH] Access token rejected");
        return AppError::SessionExpired;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return AppError::RateLimited { retry_after_secs };
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    graph_error_from_body(&body, status)
}

/// Builds a `GraphError` from an error body, falling back to the status line.
pub(crate) fn graph_error_from_body(body: &str, status: StatusCode) -> AppError {
    if let Ok(envelope) = serde_json::from_str::<WireErrorEnvelope>(body) {
        if !envelope.error.code.is_empty() || !envelope.error.message.is_empty() {
            return AppError::GraphError(format!(
                "[{}] {}",
                envelope.error.code, envelope.error.message
            ));
        }
    }

    AppError::GraphError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
