//! Microsoft Graph access layer.
//!
//! - [`client`]: authenticated request handle with safe request logging
//! - [`paging`]: `@odata.nextLink` collection
//! - [`batch`]: `$batch` dispatch with per-key results
//! - [`model`]: resource shapes the report reads

pub mod batch;
pub mod client;
pub mod model;
pub mod paging;

pub use batch::{BatchDispatcher, BatchLookup, BatchRequest, BatchResult, SubRequestError};
pub use client::{GraphClient, GraphCredentials, LoggingMode};
pub use paging::PageCollector;

/// Service principal listing with exactly the fields the report reads.
pub const SERVICE_PRINCIPALS_PATH: &str = "/v1.0/servicePrincipals?$select=id,displayName,appId,homepage,publisherName,tags,createdDateTime,appRoleAssignmentRequired,accountEnabled,oauth2PermissionScopes,appRoles&$top=999";

/// Sign-in activity report. Only published on the beta endpoint.
pub const SIGN_IN_ACTIVITIES_PATH: &str = "/beta/reports/servicePrincipalSignInActivities";
