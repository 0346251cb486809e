//! Service principal inventory for Microsoft Graph tenants.
//!
//! Lists every service principal, enriches each with its owners and app role
//! assignments through `$batch`, joins the tenant's sign-in activity report,
//! and writes one CSV row per service principal.

pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod report;

pub use config::{CliArgs, ReportConfig};
pub use error::AppError;
pub use pipeline::{run_report, run_report_with_client, RunStats};
