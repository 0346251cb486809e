//! Command-line arguments and the validated run configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::{ExposeSecret, SecretString};

use crate::error::AppError;
use crate::graph::batch::MAX_BATCH_SIZE;
use crate::graph::client::{DEFAULT_GRAPH_URL, DEFAULT_TIMEOUT_SECS};
use crate::graph::LoggingMode;
use crate::report::{ExportOptions, SortOrder, SubRequestErrorPolicy};

/// How much of each request URL shows up in logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UrlLogging {
    /// Path only.
    #[default]
    Path,
    /// Path plus query string with sensitive parameters redacted.
    PathAndQuery,
}

impl From<UrlLogging> for LoggingMode {
    fn from(value: UrlLogging) -> Self {
        match value {
            UrlLogging::Path => LoggingMode::PathOnly,
            UrlLogging::PathAndQuery => LoggingMode::PathAndQueryRedacted,
        }
    }
}

/// Service principal inventory report for a Microsoft Graph tenant.
#[derive(Parser, Debug)]
#[command(name = "app-inventory")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Graph root URL.
    #[arg(long, env = "GRAPH_URL", default_value = DEFAULT_GRAPH_URL)]
    pub graph_url: String,

    /// Bearer token for Graph.
    #[arg(long, env = "GRAPH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Directory the report is written to.
    #[arg(long, env = "REPORT_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Report file name prefix.
    #[arg(long, default_value = "AppRegistrationsReport")]
    pub file_prefix: String,

    /// Sub-requests per `$batch` call (1-20).
    #[arg(long, default_value_t = MAX_BATCH_SIZE)]
    pub batch_size: usize,

    /// Number of `$batch` calls in flight at once.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// How failed owner/assignment lookups are rendered.
    #[arg(long, value_enum, default_value_t = SubRequestErrorPolicy::Empty)]
    pub sub_request_errors: SubRequestErrorPolicy,

    /// Row ordering by display name.
    #[arg(long, value_enum, default_value_t = SortOrder::CaseInsensitive)]
    pub sort: SortOrder,

    /// Prefix the report with a UTF-8 byte order mark.
    #[arg(long)]
    pub bom: bool,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// URL detail in request logs.
    #[arg(long, value_enum, default_value_t = UrlLogging::Path)]
    pub log_urls: UrlLogging,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl CliArgs {
    /// Converts parsed arguments into a validated configuration.
    pub fn resolve(self) -> Result<ReportConfig, AppError> {
        let config = ReportConfig {
            graph_url: self.graph_url,
            access_token: SecretString::from(self.access_token),
            export: ExportOptions {
                output_dir: self.output_dir,
                file_prefix: self.file_prefix,
                sort_order: self.sort,
                with_bom: self.bom,
            },
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            sub_request_errors: self.sub_request_errors,
            timeout: Duration::from_secs(self.timeout_secs),
            logging_mode: self.log_urls.into(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Everything one report run needs.
#[derive(Clone)]
pub struct ReportConfig {
    pub graph_url: String,
    pub access_token: SecretString,
    pub export: ExportOptions,
    pub batch_size: usize,
    pub concurrency: usize,
    pub sub_request_errors: SubRequestErrorPolicy,
    pub timeout: Duration,
    pub logging_mode: LoggingMode,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            access_token: SecretString::from(String::new()),
            export: ExportOptions::default(),
            batch_size: MAX_BATCH_SIZE,
            concurrency: 1,
            sub_request_errors: SubRequestErrorPolicy::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            logging_mode: LoggingMode::default(),
        }
    }
}

impl fmt::Debug for ReportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportConfig")
            .field("graph_url", &self.graph_url)
            .field("access_token", &"[REDACTED]")
            .field("export", &self.export)
            .field("batch_size", &self.batch_size)
            .field("concurrency", &self.concurrency)
            .field("sub_request_errors", &self.sub_request_errors)
            .field("timeout", &self.timeout)
            .field("logging_mode", &self.logging_mode)
            .finish()
    }
}

impl ReportConfig {
    /// Checks the settings that would otherwise fail mid-run.
    ///
    /// # Errors
    ///
    /// - `AppError::NotAuthenticated` if the access token is blank
    /// - `AppError::InvalidConfig` for any out-of-range setting
    pub fn validate(&self) -> Result<(), AppError> {
        if self.access_token.expose_secret().trim().is_empty() {
            return Err(AppError::NotAuthenticated);
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(AppError::InvalidConfig(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(AppError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let prefix = &self.export.file_prefix;
        if prefix.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "file prefix must not be empty".to_string(),
            ));
        }
        if prefix.contains(['/', '\\']) {
            return Err(AppError::InvalidConfig(format!(
                "file prefix must not contain path separators: {}",
                prefix
            )));
        }

        Ok(())
    }
}
