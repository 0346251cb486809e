//! Graph resource shapes consumed by the report.
//!
//! Field names follow the Graph JSON exactly via `rename_all = "camelCase"`.
//! Everything optional upstream stays optional here; rendering decides how an
//! absent value looks.

use serde::Deserialize;

/// A service principal as returned by `/servicePrincipals` with the report's
/// `$select` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    pub id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub publisher_name: Option<String>,
    #[serde(default)]
    pub created_date_time: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub account_enabled: Option<bool>,
    #[serde(default)]
    pub app_role_assignment_required: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub oauth2_permission_scopes: Vec<PermissionScope>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_roles: Vec<AppRole>,
}

/// A delegated permission definition exposed by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionScope {
    #[serde(default)]
    pub value: Option<String>,
}

/// An application role definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRole {
    #[serde(default)]
    pub value: Option<String>,
}

/// One entry of `/servicePrincipals/{id}/owners`.
///
/// Owners can be users or service principals; only users carry a UPN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    #[serde(default)]
    pub user_principal_name: Option<String>,
}

/// One entry of `/servicePrincipals/{id}/appRoleAssignedTo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRoleAssignment {
    #[serde(default)]
    pub principal_display_name: Option<String>,
    #[serde(default)]
    pub principal_type: Option<String>,
}

/// A `{ lastSignInDateTime }` block in the sign-in activity report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInActivityDetail {
    #[serde(default)]
    pub last_sign_in_date_time: Option<String>,
}

/// One record of `/reports/servicePrincipalSignInActivities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInActivity {
    #[serde(default)]
    pub app_id: String,
    /// Interactive (user) sign-ins.
    #[serde(default)]
    pub last_sign_in_activity: Option<SignInActivityDetail>,
    /// Client-credential sign-ins where the app is the client.
    #[serde(default)]
    pub application_authentication_client_sign_in_activity: Option<SignInActivityDetail>,
    #[serde(default)]
    pub delegated_client_sign_in_activity: Option<SignInActivityDetail>,
    #[serde(default)]
    pub delegated_resource_sign_in_activity: Option<SignInActivityDetail>,
}

impl SignInActivity {
    pub fn interactive(&self) -> Option<&str> {
        last_seen(&self.last_sign_in_activity)
    }

    pub fn client_credential(&self) -> Option<&str> {
        last_seen(&self.application_authentication_client_sign_in_activity)
    }

    pub fn delegated_client(&self) -> Option<&str> {
        last_seen(&self.delegated_client_sign_in_activity)
    }

    pub fn delegated_resource(&self) -> Option<&str> {
        last_seen(&self.delegated_resource_sign_in_activity)
    }
}

fn last_seen(detail: &Option<SignInActivityDetail>) -> Option<&str> {
    detail
        .as_ref()
        .and_then(|d| d.last_sign_in_date_time.as_deref())
        .filter(|s| !s.trim().is_empty())
}

/// Graph sometimes sends `null` for collections; treat it as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
