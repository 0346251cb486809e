use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "access_token",
    "client_secret",
    "authorization:",
    "eyj",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation printed by the CLI on a failed run.
#[derive(Debug, Clone)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
///
/// Every variant is fatal for a report run. Failures of individual
/// sub-requests inside a `$batch` call are not errors at this level; they are
/// captured on the batch result instead.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Auth ──────────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    SessionExpired,

    // ── API ───────────────────────────────────────────────────────────────────
    #[error("Graph error: {0}")]
    GraphError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── Batch ─────────────────────────────────────────────────────────────────
    #[error("Duplicate batch request key: {0}")]
    DuplicateRequestKey(String),

    // ── Config ────────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Export ────────────────────────────────────────────────────────────────
    #[error("CSV write error: {0}")]
    CsvWriteError(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a presentation suitable for terminal output.
    /// Never leaks tokens or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Auth ──────────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Authenticated".into(),
                message: "No Graph access token was supplied.".into(),
                action: Some("Set GRAPH_ACCESS_TOKEN or pass --access-token".into()),
            },

            AppError::SessionExpired => ErrorPresentation {
                title: "Session Expired".into(),
                message: "Microsoft Graph rejected the access token.".into(),
                action: Some("Acquire a fresh token and log in again".into()),
            },

            // ── API ───────────────────────────────────────────────────────────
            AppError::GraphError(msg) => ErrorPresentation {
                title: "Graph Error".into(),
                message: sanitize_message(msg, "A Microsoft Graph error occurred."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("Microsoft Graph is throttling requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            // ── Batch ─────────────────────────────────────────────────────────
            AppError::DuplicateRequestKey(key) => ErrorPresentation {
                title: "Invalid Batch".into(),
                message: format!("The batch request key '{}' was used more than once.", key),
                action: None,
            },

            // ── Config ────────────────────────────────────────────────────────
            AppError::InvalidConfig(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration is invalid."),
                action: Some("Check the command line flags and environment".into()),
            },

            // ── Export ────────────────────────────────────────────────────────
            AppError::CsvWriteError(msg) => ErrorPresentation {
                title: "Report Export Failed".into(),
                message: format!("Could not write the report: {}", msg),
                action: Some("Check the output directory and try again".into()),
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not connect to Microsoft Graph. Please check your network connection.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Run with --log-level debug for details.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}
