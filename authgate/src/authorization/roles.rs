//! Evaluation of the nested project role claim.
//!
//! The claim maps role name to a map of organization ID to organization domain:
//!
//! ```json
//! { "urn:zitadel:iam:org:project:roles": { "admin": { "2345": "acme.example.com" } } }
//! ```
//!
//! Only the presence of an organization ID key grants a role; the domain value is for
//! display and never compared.

use serde_json::{Map, Value};

pub const PROJECT_ROLES_CLAIM: &str = "urn:zitadel:iam:org:project:roles";
pub const RESOURCE_OWNER_ID_CLAIM: &str = "urn:zitadel:iam:user:resourceowner:id";

/// Name of the role claim scoped to a single project.
pub fn project_roles_claim(project_id: &str) -> String {
    format!("urn:zitadel:iam:org:project:{project_id}:roles")
}

/// A borrowed view over one role claim. Malformed shapes evaluate to "not granted".
#[derive(Debug, Clone, Copy)]
pub struct RoleClaims<'a> {
    roles: Option<&'a Map<String, Value>>,
}

impl<'a> RoleClaims<'a> {
    pub fn from_claims(claims: &'a Map<String, Value>) -> Self {
        Self::from_claim(claims, PROJECT_ROLES_CLAIM)
    }

    pub fn for_project(claims: &'a Map<String, Value>, project_id: &str) -> Self {
        Self::from_claim(claims, &project_roles_claim(project_id))
    }

    fn from_claim(claims: &'a Map<String, Value>, name: &str) -> Self {
        Self {
            roles: claims.get(name).and_then(Value::as_object),
        }
    }

    fn organizations(&self, role: &str) -> Option<&'a Map<String, Value>> {
        self.roles?.get(role)?.as_object()
    }

    /// True iff `role` is present and granted in at least one organization.
    pub fn is_granted_role(&self, role: &str) -> bool {
        self.organizations(role).is_some_and(|orgs| !orgs.is_empty())
    }

    pub fn is_granted_role_in_organization(&self, role: &str, organization_id: &str) -> bool {
        self.organizations(role)
            .is_some_and(|orgs| orgs.contains_key(organization_id))
    }
}
