//! Joins service principals with enrichment and sign-in data into report rows.
//!
//! Compilation is pure: the same inputs always produce the same rows, and every
//! service principal yields exactly one row whether or not any lookup matched.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::graph::model::{AppRoleAssignment, Owner, ServicePrincipal, SignInActivity};
use crate::graph::{BatchLookup, SubRequestError};
use crate::report::enrich::{assignments_key, owners_key};

/// Status written when at least one sign-in timestamp is present.
pub const STATUS_ACTIVE: &str = "Active";
/// Status written when no sign-in timestamp is present.
pub const STATUS_NEVER: &str = "Never Signed In";

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// How a failed owners/assignments sub-request is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SubRequestErrorPolicy {
    /// Render like an empty result.
    #[default]
    Empty,
    /// Render `<lookup failed: CODE>` so failures stand out.
    Marker,
}

// ─────────────────────────────────────────────────────────────────────────────
// CompiledRow
// ─────────────────────────────────────────────────────────────────────────────

/// One flattened report line. Every field is already rendered text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledRow {
    pub display_name: String,
    pub app_id: String,
    pub object_id: String,
    pub homepage: String,
    pub publisher_name: String,
    pub tags: String,
    pub created_date_time: String,
    pub account_enabled: String,
    pub app_role_assignment_required: String,
    pub owners_upns: String,
    pub assigned_users_and_groups: String,
    pub oauth2_permission_scopes: String,
    pub app_roles: String,
    pub last_interactive_sign_in: String,
    pub last_client_credential_sign_in: String,
    pub last_delegated_client_sign_in: String,
    pub last_delegated_resource_sign_in: String,
    pub sign_in_status: String,
}

impl CompiledRow {
    /// Column names, in output order.
    pub const HEADERS: [&'static str; 18] = [
        "DisplayName",
        "AppId",
        "ObjectId",
        "Homepage",
        "PublisherName",
        "Tags",
        "CreatedDateTime",
        "AccountEnabled",
        "AppRoleAssignmentRequired",
        "OwnersUPNs",
        "AssignedUsersAndGroups",
        "Oauth2PermissionScopes",
        "AppRoles",
        "LastInteractiveSignIn",
        "LastClientCredentialSignIn",
        "LastDelegatedClientSignIn",
        "LastDelegatedResourceSignIn",
        "SignInStatus",
    ];

    /// Field values in the same order as [`HEADERS`](Self::HEADERS).
    pub fn fields(&self) -> [&str; 18] {
        [
            self.display_name.as_str(),
            self.app_id.as_str(),
            self.object_id.as_str(),
            self.homepage.as_str(),
            self.publisher_name.as_str(),
            self.tags.as_str(),
            self.created_date_time.as_str(),
            self.account_enabled.as_str(),
            self.app_role_assignment_required.as_str(),
            self.owners_upns.as_str(),
            self.assigned_users_and_groups.as_str(),
            self.oauth2_permission_scopes.as_str(),
            self.app_roles.as_str(),
            self.last_interactive_sign_in.as_str(),
            self.last_client_credential_sign_in.as_str(),
            self.last_delegated_client_sign_in.as_str(),
            self.last_delegated_resource_sign_in.as_str(),
            self.sign_in_status.as_str(),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sign-in index
// ─────────────────────────────────────────────────────────────────────────────

/// `appId` → sign-in record. The first record seen for an `appId` wins.
pub struct SignInIndex<'a> {
    by_app_id: HashMap<&'a str, &'a SignInActivity>,
}

impl<'a> SignInIndex<'a> {
    pub fn build(records: &'a [SignInActivity]) -> Self {
        let mut by_app_id = HashMap::with_capacity(records.len());
        for record in records {
            by_app_id.entry(record.app_id.as_str()).or_insert(record);
        }
        Self { by_app_id }
    }

    pub fn get(&self, app_id: &str) -> Option<&'a SignInActivity> {
        self.by_app_id.get(app_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_app_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_app_id.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compilation
// ─────────────────────────────────────────────────────────────────────────────

/// Compiles one row per service principal, preserving input order.
pub fn compile_rows(
    entities: &[ServicePrincipal],
    lookup: &BatchLookup,
    sign_ins: &SignInIndex<'_>,
    policy: SubRequestErrorPolicy,
) -> Vec<CompiledRow> {
    let rows: Vec<CompiledRow> = entities
        .iter()
        .map(|sp| compile_row(sp, lookup, sign_ins, policy))
        .collect();

    debug!(
        "[REPORT] Compiled {} rows against {} sign-in records",
        rows.len(),
        sign_ins.len()
    );
    rows
}

/// Compiles the row for a single service principal.
pub fn compile_row(
    sp: &ServicePrincipal,
    lookup: &BatchLookup,
    sign_ins: &SignInIndex<'_>,
    policy: SubRequestErrorPolicy,
) -> CompiledRow {
    let owners_upns = match lookup_items::<Owner>(lookup, &owners_key(&sp.id)) {
        Ok(owners) => owners
            .iter()
            .filter_map(|o| o.user_principal_name.as_deref())
            .filter(|upn| !upn.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Err(error) => render_failure(&error, policy),
    };

    let assigned_users_and_groups =
        match lookup_items::<AppRoleAssignment>(lookup, &assignments_key(&sp.id)) {
            Ok(assignments) => assignments
                .iter()
                .map(|a| {
                    format!(
                        "{} [{}]",
                        a.principal_display_name.as_deref().unwrap_or_default(),
                        a.principal_type.as_deref().unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join(", "),
            Err(error) => render_failure(&error, policy),
        };

    let sign_in = sign_ins.get(&sp.app_id);
    let last_interactive_sign_in = render_timestamp(sign_in.and_then(|s| s.interactive()));
    let last_client_credential_sign_in =
        render_timestamp(sign_in.and_then(|s| s.client_credential()));
    let last_delegated_client_sign_in =
        render_timestamp(sign_in.and_then(|s| s.delegated_client()));
    let last_delegated_resource_sign_in =
        render_timestamp(sign_in.and_then(|s| s.delegated_resource()));

    let any_sign_in = [
        &last_interactive_sign_in,
        &last_client_credential_sign_in,
        &last_delegated_client_sign_in,
        &last_delegated_resource_sign_in,
    ]
    .iter()
    .any(|s| !s.is_empty());

    CompiledRow {
        display_name: sp.display_name.clone().unwrap_or_default(),
        app_id: sp.app_id.clone(),
        object_id: sp.id.clone(),
        homepage: sp.homepage.clone().unwrap_or_default(),
        publisher_name: sp.publisher_name.clone().unwrap_or_default(),
        tags: sp.tags.join(", "),
        created_date_time: render_timestamp(sp.created_date_time.as_deref()),
        account_enabled: render_bool(sp.account_enabled),
        app_role_assignment_required: render_bool(sp.app_role_assignment_required),
        owners_upns,
        assigned_users_and_groups,
        oauth2_permission_scopes: join_values(
            sp.oauth2_permission_scopes.iter().map(|s| s.value.as_deref()),
        ),
        app_roles: join_values(sp.app_roles.iter().map(|r| r.value.as_deref())),
        last_interactive_sign_in,
        last_client_credential_sign_in,
        last_delegated_client_sign_in,
        last_delegated_resource_sign_in,
        sign_in_status: if any_sign_in {
            STATUS_ACTIVE.to_string()
        } else {
            STATUS_NEVER.to_string()
        },
    }
}

/// Decodes a lookup entry; a missing key reads as an empty collection.
fn lookup_items<T: serde::de::DeserializeOwned>(
    lookup: &BatchLookup,
    key: &str,
) -> Result<Vec<T>, SubRequestError> {
    match lookup.get(key) {
        Some(result) => result.value_items(),
        None => Ok(Vec::new()),
    }
}

fn render_failure(error: &SubRequestError, policy: SubRequestErrorPolicy) -> String {
    match policy {
        SubRequestErrorPolicy::Empty => String::new(),
        SubRequestErrorPolicy::Marker => format!("<lookup failed: {}>", error.code),
    }
}

fn join_values<'a>(values: impl Iterator<Item = Option<&'a str>>) -> String {
    values
        .flatten()
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Renders booleans as `true`/`false`, absent as empty.
pub fn render_bool(value: Option<bool>) -> String {
    match value {
        Some(true) => "true".to_string(),
        Some(false) => "false".to_string(),
        None => String::new(),
    }
}

/// Normalizes an RFC 3339 timestamp to UTC with a `Z` suffix.
///
/// Values already in `Z` form keep Graph's own fraction digits. Values that
/// do not parse are passed through unchanged.
pub fn render_timestamp(value: Option<&str>) -> String {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return String::new();
    };

    match DateTime::parse_from_rfc3339(raw) {
        Ok(_) if raw.ends_with('Z') => raw.to_string(),
        Ok(ts) => ts
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        Err(_) => raw.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
