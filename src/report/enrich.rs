//! Owner and assignment lookups for each service principal.

use crate::graph::model::ServicePrincipal;
use crate::graph::BatchRequest;

/// Lookup key of the owners sub-request for a service principal.
pub fn owners_key(entity_id: &str) -> String {
    format!("{}_owners", entity_id)
}

/// Lookup key of the app role assignments sub-request for a service principal.
pub fn assignments_key(entity_id: &str) -> String {
    format!("{}_assignments", entity_id)
}

/// Builds the two sub-requests per service principal, owners first.
pub fn enrichment_requests(entities: &[ServicePrincipal]) -> Vec<BatchRequest> {
    entities
        .iter()
        .flat_map(|sp| {
            [
                BatchRequest::get(
                    owners_key(&sp.id),
                    format!("/servicePrincipals/{}/owners?$select=userPrincipalName", sp.id),
                ),
                BatchRequest::get(
                    assignments_key(&sp.id),
                    format!(
                        "/servicePrincipals/{}/appRoleAssignedTo?$select=principalDisplayName,principalType",
                        sp.id
                    ),
                ),
            ]
        })
        .collect()
}
